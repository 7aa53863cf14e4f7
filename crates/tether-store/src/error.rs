use tether_types::Checksum;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested checksum is not in the store.
    ///
    /// On the host this is a fatal internal inconsistency: the host owns
    /// every checksum it hands out.
    #[error("checksum not found: {0}")]
    NotFound(Checksum),

    /// Content hash mismatch (data corruption).
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: Checksum, computed: Checksum },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record failed its integrity check.
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Attempted to use the null checksum as a key.
    #[error("cannot store object with null checksum")]
    NullChecksum,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
