use tether_protocol::{ErrorCode, ProtocolError, RemoteError};
use tether_rpc::RpcError;
use tether_snapshot::SnapshotError;
use tether_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// The worker connection dropped or the worker process died.
    #[error("connection to worker lost")]
    ConnectionLost,

    /// The worker asked for content the host should own.
    #[error("checksum not found on host: {0}")]
    ChecksumNotFound(String),

    #[error("synchronization failed: {0}")]
    SyncFailed(String),

    #[error("request faulted: {0}")]
    RequestFaulted(String),

    #[error("request canceled")]
    Canceled,

    #[error("request rejected: {0}")]
    QueueRejected(String),

    /// Any other error the worker answered with.
    #[error("worker error: {0}")]
    Remote(RemoteError),

    #[error("failed to launch worker: {0}")]
    Launch(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether the call should be retried against a fresh worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::SyncFailed(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionLost => ErrorCode::ConnectionLost,
            Self::ChecksumNotFound(_) => ErrorCode::ChecksumNotFound,
            Self::SyncFailed(_) => ErrorCode::SyncFailed,
            Self::RequestFaulted(_) => ErrorCode::RequestFaulted,
            Self::Canceled => ErrorCode::Canceled,
            Self::QueueRejected(_) => ErrorCode::QueueRejected,
            Self::Remote(e) => e.code,
            Self::Protocol(ProtocolError::InvalidParams(_)) => ErrorCode::InvalidParams,
            Self::Launch(_) | Self::Protocol(_) | Self::Snapshot(_) | Self::Store(_) | Self::Io(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl From<RemoteError> for HostError {
    fn from(e: RemoteError) -> Self {
        match e.code {
            ErrorCode::ConnectionLost => Self::ConnectionLost,
            ErrorCode::ChecksumNotFound => Self::ChecksumNotFound(e.message),
            ErrorCode::SyncFailed => Self::SyncFailed(e.message),
            ErrorCode::RequestFaulted => Self::RequestFaulted(e.message),
            ErrorCode::Canceled => Self::Canceled,
            ErrorCode::QueueRejected => Self::QueueRejected(e.message),
            _ => Self::Remote(e),
        }
    }
}

impl From<RpcError> for HostError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::ConnectionLost => Self::ConnectionLost,
            RpcError::Canceled => Self::Canceled,
            RpcError::Remote(remote) => remote.into(),
            RpcError::Protocol(p) => Self::Protocol(p),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
