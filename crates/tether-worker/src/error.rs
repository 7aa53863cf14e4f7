use tether_dispatch::DispatchError;
use tether_protocol::{ErrorCode, ProtocolError, RemoteError};
use tether_rpc::RpcError;
use tether_store::StoreError;
use tether_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("synchronization failed: {0}")]
    Sync(#[from] SyncError),

    /// The language service answered with an error.
    #[error(transparent)]
    Service(#[from] RemoteError),

    #[error("request canceled")]
    Canceled,

    #[error("request faulted: {0}")]
    Faulted(String),

    #[error("worker is shutting down")]
    QueueRejected,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::Sync(SyncError::ChecksumNotFound(_)) => ErrorCode::ChecksumNotFound,
            Self::Sync(SyncError::ConnectionLost) => ErrorCode::ConnectionLost,
            Self::Sync(SyncError::Canceled) | Self::Canceled => ErrorCode::Canceled,
            Self::Sync(_) => ErrorCode::SyncFailed,
            Self::Service(e) => e.code,
            Self::Faulted(_) => ErrorCode::RequestFaulted,
            Self::QueueRejected => ErrorCode::QueueRejected,
            Self::Protocol(ProtocolError::InvalidParams(_)) => ErrorCode::InvalidParams,
            Self::Rpc(e) => e.code(),
            Self::Protocol(_) | Self::Store(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Convert into an error suitable for a response frame.
    pub fn into_remote(self) -> RemoteError {
        match self {
            Self::Service(e) => e,
            other => RemoteError::new(other.code(), other.to_string()),
        }
    }
}

impl From<DispatchError<WorkerError>> for WorkerError {
    fn from(e: DispatchError<WorkerError>) -> Self {
        match e {
            DispatchError::Canceled => Self::Canceled,
            DispatchError::Faulted(msg) => Self::Faulted(msg),
            DispatchError::QueueRejected => Self::QueueRejected,
            DispatchError::Handler(e) => e,
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
