use async_trait::async_trait;
use serde_json::Value;
use tether_protocol::RemoteError;
use tether_types::CancellationSignal;

/// Serves the requests and notifications a peer sends.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request. `cancel` fires when the peer sends a `cancel`
    /// notification for this request or the connection closes.
    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationSignal,
    ) -> Result<Value, RemoteError>;

    /// Handle a notification other than `cancel`. Ignored by default.
    async fn handle_notification(&self, method: &str, params: Value) {
        let _ = (method, params);
    }
}
