use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_types::RequestId;

use crate::error::{ProtocolError, ProtocolResult};

/// Error categories carried in an error response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Transport severed mid-call or the peer process died.
    ConnectionLost,
    /// The host was asked for content it should own.
    ChecksumNotFound,
    /// The worker could not complete snapshot resolution.
    SyncFailed,
    /// The handler failed while executing.
    RequestFaulted,
    /// Cooperative cancellation was honored.
    Canceled,
    /// Submitted while the peer is shutting down.
    QueueRejected,
    MethodNotFound,
    InvalidParams,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConnectionLost => "connection-lost",
            Self::ChecksumNotFound => "checksum-not-found",
            Self::SyncFailed => "sync-failed",
            Self::RequestFaulted => "request-faulted",
            Self::Canceled => "canceled",
            Self::QueueRejected => "queue-rejected",
            Self::MethodNotFound => "method-not-found",
            Self::InvalidParams => "invalid-params",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The error half of a response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn connection_lost() -> Self {
        Self::new(ErrorCode::ConnectionLost, "connection lost")
    }

    pub fn canceled() -> Self {
        Self::new(ErrorCode::Canceled, "request canceled")
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, RemoteError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn request<T: Serialize>(id: RequestId, method: &str, params: &T) -> ProtocolResult<Self> {
        Ok(Self::Request {
            id,
            method: method.to_string(),
            params: encode_params(params)?,
        })
    }

    pub fn notification<T: Serialize>(method: &str, params: &T) -> ProtocolResult<Self> {
        Ok(Self::Notification {
            method: method.to_string(),
            params: encode_params(params)?,
        })
    }

    pub fn ok(id: RequestId, result: Value) -> Self {
        Self::Response {
            id,
            outcome: Ok(result),
        }
    }

    pub fn error(id: RequestId, error: RemoteError) -> Self {
        Self::Response {
            id,
            outcome: Err(error),
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(*id),
            Self::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "Request",
            Self::Response { .. } => "Response",
            Self::Notification { .. } => "Notification",
        }
    }
}

/// Flat object form of a [`Message`]:
/// `{ id?, method?, params?, result?, error? }`.
#[derive(Default, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

impl From<Message> for Envelope {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Request { id, method, params } => Envelope {
                id: Some(id),
                method: Some(method),
                params: Some(params),
                ..Default::default()
            },
            Message::Response { id, outcome } => match outcome {
                Ok(result) => Envelope {
                    id: Some(id),
                    result: Some(result),
                    ..Default::default()
                },
                Err(error) => Envelope {
                    id: Some(id),
                    error: Some(error),
                    ..Default::default()
                },
            },
            Message::Notification { method, params } => Envelope {
                method: Some(method),
                params: Some(params),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = ProtocolError;

    fn try_from(env: Envelope) -> ProtocolResult<Self> {
        match (env.id, env.method) {
            (Some(id), Some(method)) => Ok(Message::Request {
                id,
                method,
                params: env.params.unwrap_or(Value::Null),
            }),
            (None, Some(method)) => Ok(Message::Notification {
                method,
                params: env.params.unwrap_or(Value::Null),
            }),
            (Some(id), None) => match (env.result, env.error) {
                (_, Some(error)) => Ok(Message::error(id, error)),
                (result, None) => Ok(Message::ok(id, result.unwrap_or(Value::Null))),
            },
            (None, None) => Err(ProtocolError::Malformed(
                "message has neither id nor method".into(),
            )),
        }
    }
}

/// Serialize method parameters or results.
pub fn encode_params<T: Serialize>(params: &T) -> ProtocolResult<Value> {
    serde_json::to_value(params).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Deserialize method parameters or results.
pub fn decode_params<T: DeserializeOwned>(params: Value) -> ProtocolResult<T> {
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let msg = Message::request(RequestId::new(7), "invoke", &json!({"a": 1})).unwrap();
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire, json!({"id": 7, "method": "invoke", "params": {"a": 1}}));
    }

    #[test]
    fn notification_has_no_id() {
        let msg = Message::notification("cancel", &json!({"id": 3})).unwrap();
        let wire = serde_json::to_value(&msg).unwrap();
        assert!(wire.get("id").is_none());
        assert_eq!(msg.id(), None);
        assert_eq!(msg.method(), Some("cancel"));
    }

    #[test]
    fn error_response_roundtrip() {
        let msg = Message::error(RequestId::new(2), RemoteError::canceled());
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"canceled\""));
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn ok_response_with_null_result() {
        let back: Message = serde_json::from_str(r#"{"id": 4}"#).unwrap();
        assert_eq!(back, Message::ok(RequestId::new(4), Value::Null));
    }

    #[test]
    fn empty_object_is_malformed() {
        assert!(serde_json::from_str::<Message>("{}").is_err());
    }

    #[test]
    fn decode_params_reports_invalid() {
        let err = decode_params::<u64>(json!("nope")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParams(_)));
    }

    #[test]
    fn error_code_display_matches_wire() {
        let wire = serde_json::to_value(ErrorCode::ChecksumNotFound).unwrap();
        assert_eq!(wire, json!(ErrorCode::ChecksumNotFound.to_string()));
    }
}
