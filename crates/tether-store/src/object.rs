use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tether_crypto::ContentHasher;
use tether_types::Checksum;

use crate::error::{StoreError, StoreResult};

/// The logical kind tag of a stored node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    /// Raw source text of one document.
    SourceText,
    /// A project's option set.
    Options,
    /// A project's list of reference identities.
    References,
    /// Document attributes plus the checksum of its text.
    Document,
    /// Project shape: attributes plus checksums of its children.
    Project,
    /// Solution root: the ordered project checksums.
    Solution,
}

impl ObjectKind {
    /// The domain-separated hasher for this kind.
    pub fn hasher(&self) -> &'static ContentHasher {
        match self {
            Self::SourceText => &ContentHasher::SOURCE_TEXT,
            Self::Options => &ContentHasher::OPTIONS,
            Self::References => &ContentHasher::REFERENCES,
            Self::Document => &ContentHasher::DOCUMENT,
            Self::Project => &ContentHasher::PROJECT,
            Self::Solution => &ContentHasher::SOLUTION,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceText => write!(f, "source-text"),
            Self::Options => write!(f, "options"),
            Self::References => write!(f, "references"),
            Self::Document => write!(f, "document"),
            Self::Project => write!(f, "project"),
            Self::Solution => write!(f, "solution"),
        }
    }
}

/// A stored object: kind tag + serialized bytes.
///
/// `StoredObject` is the unit of storage and of transfer between host and
/// worker. Cloning is cheap; the bytes are reference counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// The type of this object.
    pub kind: ObjectKind,
    /// The serialized bytes of the object.
    pub data: Bytes,
}

impl StoredObject {
    /// Create a new stored object from kind and data.
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Serialize `value` as canonical JSON into an object of `kind`.
    pub fn encode_json<T: Serialize>(kind: ObjectKind, value: &T) -> StoreResult<Self> {
        let data =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::new(kind, data))
    }

    /// Decode the JSON payload, checking the kind tag first.
    pub fn decode_json<T: DeserializeOwned>(&self, expected: ObjectKind) -> StoreResult<T> {
        self.expect_kind(expected)?;
        serde_json::from_slice(&self.data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Fail unless this object has the given kind.
    pub fn expect_kind(&self, expected: ObjectKind) -> StoreResult<()> {
        if self.kind != expected {
            return Err(StoreError::Serialization(format!(
                "expected {expected}, got {}",
                self.kind
            )));
        }
        Ok(())
    }

    /// The size of `data` in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Compute the content-addressed checksum for this object.
    pub fn compute_checksum(&self) -> Checksum {
        self.kind.hasher().hash(&self.data)
    }

    /// Verify that this object hashes to `expected`.
    pub fn verify(&self, expected: &Checksum) -> StoreResult<()> {
        let computed = self.compute_checksum();
        if computed != *expected {
            return Err(StoreError::HashMismatch {
                expected: *expected,
                computed,
            });
        }
        Ok(())
    }
}
