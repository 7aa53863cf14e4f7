use tether_snapshot::SnapshotError;
use tether_store::StoreError;
use tether_types::Checksum;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The authoritative side does not have a node it handed out.
    #[error("checksum not found on host: {0}")]
    ChecksumNotFound(Checksum),

    /// The transport to the host dropped mid-walk.
    #[error("connection lost during synchronization")]
    ConnectionLost,

    #[error("synchronization canceled")]
    Canceled,

    /// A pulled node did not hash to the checksum it was requested by.
    #[error("verification failed for {checksum}: {reason}")]
    VerificationFailed { checksum: Checksum, reason: String },

    /// The source answered without a node that was requested.
    #[error("asset missing from response: {0}")]
    Incomplete(Checksum),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;
