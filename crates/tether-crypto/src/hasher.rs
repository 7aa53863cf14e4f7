use tether_types::Checksum;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"tether-text-v1"`) that is
/// prepended to every hash computation. This prevents cross-kind checksum
/// collisions: a document's source text and a project's option set with
/// identical bytes produce different checksums.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for raw source text.
    pub const SOURCE_TEXT: Self = Self {
        domain: "tether-text-v1",
    };
    /// Hasher for project option sets.
    pub const OPTIONS: Self = Self {
        domain: "tether-options-v1",
    };
    /// Hasher for project reference lists.
    pub const REFERENCES: Self = Self {
        domain: "tether-references-v1",
    };
    /// Hasher for document attribute nodes.
    pub const DOCUMENT: Self = Self {
        domain: "tether-document-v1",
    };
    /// Hasher for project shape nodes.
    pub const PROJECT: Self = Self {
        domain: "tether-project-v1",
    };
    /// Hasher for solution roots.
    pub const SOLUTION: Self = Self {
        domain: "tether-solution-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Checksum {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Checksum::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected checksum.
    pub fn verify(&self, data: &[u8], expected: &Checksum) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
