use tether_protocol::{ErrorCode, ProtocolError, RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The connection closed before a response arrived.
    #[error("connection lost")]
    ConnectionLost,

    /// The caller canceled the request.
    #[error("request canceled")]
    Canceled,

    /// The peer answered with an error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl RpcError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionLost => ErrorCode::ConnectionLost,
            Self::Canceled => ErrorCode::Canceled,
            Self::Remote(e) => e.code,
            Self::Protocol(ProtocolError::InvalidParams(_)) => ErrorCode::InvalidParams,
            Self::Protocol(_) => ErrorCode::Internal,
        }
    }

    /// Convert into an error suitable for a response frame.
    pub fn into_remote(self) -> RemoteError {
        match self {
            Self::Remote(e) => e,
            other => RemoteError::new(other.code(), other.to_string()),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
