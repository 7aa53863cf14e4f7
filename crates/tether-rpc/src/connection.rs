use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tether_protocol::{
    decode_params, encode_params, methods, CancelParams, ErrorCode, FrameCodec, Message,
    ProtocolError, RemoteError,
};
use tether_types::{CancellationSignal, RequestId};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcResult};
use crate::handler::RequestHandler;

type Reply = oneshot::Sender<Result<Value, RemoteError>>;

struct ConnState {
    closed: bool,
    /// Requests we sent, awaiting a response.
    pending: HashMap<RequestId, Reply>,
    /// Requests the peer sent that are still being handled.
    incoming: HashMap<RequestId, CancellationSignal>,
}

struct Shared {
    name: String,
    outgoing: mpsc::UnboundedSender<Message>,
    state: Mutex<ConnState>,
    next_id: AtomicU64,
    closed: CancellationSignal,
}

impl Shared {
    fn send(&self, msg: Message) -> RpcResult<()> {
        self.outgoing.send(msg).map_err(|_| RpcError::ConnectionLost)
    }

    /// Terminal shutdown: fail every pending request, cancel every incoming
    /// one and stop both IO tasks.
    fn shutdown(&self, reason: &str) {
        let (pending, incoming) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.incoming),
            )
        };
        // Dropping the reply senders wakes each caller with ConnectionLost.
        let failed = pending.len();
        drop(pending);
        for signal in incoming.values() {
            signal.cancel();
        }
        self.closed.cancel();
        info!(
            connection = %self.name,
            reason,
            failed,
            canceled = incoming.len(),
            "connection closed"
        );
    }

    fn complete(&self, id: RequestId, outcome: Result<Value, RemoteError>) {
        let reply = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.pending.remove(&id)
        };
        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => debug!(connection = %self.name, %id, "response for unknown request"),
        }
    }

    fn cancel_incoming(&self, id: RequestId) {
        let state = self.state.lock().expect("lock poisoned");
        if let Some(signal) = state.incoming.get(&id) {
            debug!(connection = %self.name, %id, "peer canceled request");
            signal.cancel();
        }
    }

    /// A message that cannot be framed fails only its own request: an
    /// outgoing response is replaced by an error response, an outgoing
    /// request completes locally with that error.
    fn reject_unsendable(&self, msg: Message, error: &ProtocolError) {
        match msg {
            Message::Response { id, .. } => {
                warn!(connection = %self.name, %id, error = %error, "response too large to send");
                let reply = Message::error(id, RemoteError::new(ErrorCode::Internal, error.to_string()));
                if self.send(reply).is_err() {
                    self.shutdown("writer gone");
                }
            }
            Message::Request { id, method, .. } => {
                warn!(connection = %self.name, %id, method = %method, error = %error, "request too large to send");
                self.complete(id, Err(RemoteError::new(ErrorCode::Internal, error.to_string())));
            }
            Message::Notification { method, .. } => {
                warn!(connection = %self.name, method = %method, error = %error, "notification dropped");
            }
        }
    }

    fn finish_incoming(&self, id: RequestId, outcome: Result<Value, RemoteError>) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.closed {
                return;
            }
            state.incoming.remove(&id);
        }
        let msg = match outcome {
            Ok(result) => Message::ok(id, result),
            Err(error) => Message::error(id, error),
        };
        if self.send(msg).is_err() {
            self.shutdown("writer gone");
        }
    }
}

/// Cloneable handle for issuing requests and notifications on a
/// connection.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<Shared>,
}

impl RpcClient {
    /// Send a request and wait for its response.
    ///
    /// If `cancel` fires first, a `cancel` notification is sent to the peer
    /// and [`RpcError::Canceled`] is returned without waiting further.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationSignal,
    ) -> RpcResult<Value> {
        if cancel.is_cancelled() {
            return Err(RpcError::Canceled);
        }
        let id = RequestId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().expect("lock poisoned");
            if state.closed {
                return Err(RpcError::ConnectionLost);
            }
            state.pending.insert(id, tx);
        }

        let msg = Message::Request {
            id,
            method: method.to_string(),
            params,
        };
        if self.shared.send(msg).is_err() {
            self.shared.shutdown("writer gone");
            return Err(RpcError::ConnectionLost);
        }
        debug!(connection = %self.shared.name, %id, method, "request sent");

        tokio::select! {
            biased;
            outcome = rx => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) => Err(RpcError::Remote(error)),
                Err(_) => Err(RpcError::ConnectionLost),
            },
            _ = cancel.cancelled() => {
                {
                    let mut state = self.shared.state.lock().expect("lock poisoned");
                    state.pending.remove(&id);
                }
                if let Err(e) = self.notify(methods::CANCEL, &CancelParams { id }) {
                    debug!(connection = %self.shared.name, %id, error = %e, "cancel not delivered");
                }
                Err(RpcError::Canceled)
            }
        }
    }

    /// Typed wrapper over [`request`](Self::request).
    pub async fn call<P, R>(&self, method: &str, params: &P, cancel: &CancellationSignal) -> RpcResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let result = self.request(method, encode_params(params)?, cancel).await?;
        Ok(decode_params(result)?)
    }

    /// Send a notification. No response is expected.
    pub fn notify<P: Serialize>(&self, method: &str, params: &P) -> RpcResult<()> {
        if self.is_closed() {
            return Err(RpcError::ConnectionLost);
        }
        self.shared.send(Message::notification(method, params)?)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Wait until the connection has closed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Close the connection. Outstanding requests fail with
    /// [`RpcError::ConnectionLost`].
    pub fn close(&self) {
        self.shared.shutdown("closed locally");
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.state.lock().expect("lock poisoned").pending.len()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("name", &self.shared.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A running connection: the client handle plus its IO tasks.
///
/// Dropping the connection closes it.
pub struct RpcConnection {
    client: RpcClient,
    tasks: Vec<JoinHandle<()>>,
}

impl RpcConnection {
    /// Start serving a connection over `reader`/`writer`.
    ///
    /// `make_handler` receives a client for the same connection, so the
    /// handler can issue requests back to the peer while serving one.
    pub fn spawn<R, W, H, F>(name: impl Into<String>, reader: R, writer: W, make_handler: F) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: RequestHandler,
        F: FnOnce(RpcClient) -> H,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.into(),
            outgoing: tx,
            state: Mutex::new(ConnState {
                closed: false,
                pending: HashMap::new(),
                incoming: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            closed: CancellationSignal::new(),
        });
        let client = RpcClient {
            shared: Arc::clone(&shared),
        };
        let handler = Arc::new(make_handler(client.clone()));

        let writer_task = tokio::spawn(write_loop(Arc::clone(&shared), writer, rx));
        let reader_task = tokio::spawn(read_loop(shared, reader, handler));
        debug!(connection = %client.name(), "connection started");

        Self {
            client,
            tasks: vec![reader_task, writer_task],
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Close and wait for both IO tasks to finish.
    pub async fn shutdown(mut self) {
        self.client.close();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.client.close();
    }
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.client, f)
    }
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = shared.closed.cancelled() => None,
        };
        let Some(msg) = msg else { break };
        let frame = match FrameCodec::encode(&msg) {
            Ok(frame) => frame,
            Err(e @ ProtocolError::MessageTooLarge { .. }) => {
                shared.reject_unsendable(msg, &e);
                continue;
            }
            Err(e) => {
                warn!(connection = %shared.name, error = %e, "encode failed");
                shared.shutdown("encode failed");
                break;
            }
        };
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(connection = %shared.name, error = %e, "write failed");
            shared.shutdown("write failed");
            break;
        }
    }
}

async fn read_loop<R, H>(shared: Arc<Shared>, mut reader: R, handler: Arc<H>)
where
    R: AsyncRead + Unpin,
    H: RequestHandler,
{
    loop {
        let frame = tokio::select! {
            frame = FrameCodec::read_frame(&mut reader) => frame,
            _ = shared.closed.cancelled() => return,
        };
        match frame {
            Ok(Some(msg)) => dispatch(&shared, &handler, msg).await,
            Ok(None) => {
                shared.shutdown("end of stream");
                return;
            }
            Err(e) => {
                warn!(connection = %shared.name, error = %e, "read failed");
                shared.shutdown("read failed");
                return;
            }
        }
    }
}

async fn dispatch<H: RequestHandler>(shared: &Arc<Shared>, handler: &Arc<H>, msg: Message) {
    match msg {
        Message::Response { id, outcome } => shared.complete(id, outcome),
        Message::Request { id, method, params } => {
            let cancel = CancellationSignal::new();
            {
                let mut state = shared.state.lock().expect("lock poisoned");
                if state.closed {
                    return;
                }
                state.incoming.insert(id, cancel.clone());
            }
            let shared = Arc::clone(shared);
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                let name = method.clone();
                let task =
                    tokio::spawn(async move { handler.handle_request(&name, params, cancel).await });
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        warn!(connection = %shared.name, %id, method = %method, "handler panicked");
                        Err(RemoteError::new(
                            ErrorCode::RequestFaulted,
                            format!("handler for {method} panicked"),
                        ))
                    }
                    Err(_) => Err(RemoteError::canceled()),
                };
                shared.finish_incoming(id, outcome);
            });
        }
        Message::Notification { method, params } if method == methods::CANCEL => {
            match decode_params::<CancelParams>(params) {
                Ok(p) => shared.cancel_incoming(p.id),
                Err(e) => warn!(connection = %shared.name, error = %e, "bad cancel notification"),
            }
        }
        Message::Notification { method, params } => {
            handler.handle_notification(&method, params).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Test handler: `echo` returns params, `wait` blocks until canceled,
    /// `panic` panics, `huge` answers with more than one frame can hold,
    /// `ask` calls `echo` back on the peer.
    struct TestHandler {
        peer: RpcClient,
        saw_cancel: Arc<AtomicBool>,
        notified: Arc<Notify>,
        notes: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RequestHandler for TestHandler {
        async fn handle_request(
            &self,
            method: &str,
            params: Value,
            cancel: CancellationSignal,
        ) -> Result<Value, RemoteError> {
            match method {
                "echo" => Ok(params),
                "wait" => {
                    cancel.cancelled().await;
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    self.notified.notify_one();
                    Err(RemoteError::canceled())
                }
                "panic" => panic!("boom"),
                "huge" => Ok(Value::String("x".repeat(tether_protocol::MAX_FRAME_SIZE))),
                "ask" => self
                    .peer
                    .request("echo", json!({"from": "callback"}), &cancel)
                    .await
                    .map_err(RpcError::into_remote),
                other => Err(RemoteError::new(ErrorCode::MethodNotFound, other)),
            }
        }

        async fn handle_notification(&self, method: &str, _params: Value) {
            self.notes.lock().unwrap().push(method.to_string());
            self.notified.notify_one();
        }
    }

    struct Observed {
        saw_cancel: Arc<AtomicBool>,
        notified: Arc<Notify>,
        notes: Arc<Mutex<Vec<String>>>,
    }

    fn endpoint<R, W>(name: &str, reader: R, writer: W) -> (RpcConnection, Observed)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let observed = Observed {
            saw_cancel: Arc::new(AtomicBool::new(false)),
            notified: Arc::new(Notify::new()),
            notes: Arc::new(Mutex::new(Vec::new())),
        };
        let (saw_cancel, notified, notes) = (
            observed.saw_cancel.clone(),
            observed.notified.clone(),
            observed.notes.clone(),
        );
        let conn = RpcConnection::spawn(name, reader, writer, move |peer| TestHandler {
            peer,
            saw_cancel,
            notified,
            notes,
        });
        (conn, observed)
    }

    fn pair() -> (RpcConnection, RpcConnection, Observed) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let (host, _) = endpoint("host", ar, aw);
        let (worker, observed) = endpoint("worker", br, bw);
        (host, worker, observed)
    }

    #[tokio::test]
    async fn request_response() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let out = host.client().request("echo", json!([1, 2, 3]), &never).await.unwrap();
        assert_eq!(out, json!([1, 2, 3]));
        assert_eq!(host.client().pending_requests(), 0);
    }

    #[tokio::test]
    async fn typed_call() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let out: Vec<u32> = host.client().call("echo", &vec![4u32, 5], &never).await.unwrap();
        assert_eq!(out, vec![4, 5]);
    }

    #[tokio::test]
    async fn remote_error_is_typed() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let err = host.client().request("nope", Value::Null, &never).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn concurrent_requests_are_matched_by_id() {
        let (host, _worker, _) = pair();
        let client = host.client().clone();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let never = CancellationSignal::new();
                client.request("echo", json!(i), &never).await.unwrap()
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), json!(i));
        }
    }

    #[tokio::test]
    async fn oversized_response_fails_only_its_request() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let err = host.client().request("huge", Value::Null, &never).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(!host.client().is_closed());
        let out = host.client().request("echo", json!("still up"), &never).await.unwrap();
        assert_eq!(out, json!("still up"));
    }

    #[tokio::test]
    async fn oversized_request_fails_locally() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let params = Value::String("y".repeat(tether_protocol::MAX_FRAME_SIZE));
        let err = host.client().request("echo", params, &never).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(host.client().pending_requests(), 0);
        let out = host.client().request("echo", json!(1), &never).await.unwrap();
        assert_eq!(out, json!(1));
    }

    #[tokio::test]
    async fn handler_can_call_back_into_peer() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let out = host.client().request("ask", Value::Null, &never).await.unwrap();
        assert_eq!(out, json!({"from": "callback"}));
    }

    #[tokio::test]
    async fn cancel_propagates_to_peer_handler() {
        let (host, _worker, observed) = pair();
        let cancel = CancellationSignal::new();
        let client = host.client().clone();
        let call = {
            let cancel = cancel.clone();
            tokio::spawn(async move { client.request("wait", Value::Null, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Canceled));
        tokio::time::timeout(Duration::from_secs(5), observed.notified.notified())
            .await
            .unwrap();
        assert!(observed.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn already_canceled_request_is_not_sent() {
        let (host, _worker, _) = pair();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let err = host.client().request("echo", Value::Null, &cancel).await.unwrap_err();
        assert!(matches!(err, RpcError::Canceled));
        assert_eq!(host.client().pending_requests(), 0);
    }

    #[tokio::test]
    async fn handler_panic_becomes_faulted_response() {
        let (host, _worker, _) = pair();
        let never = CancellationSignal::new();
        let err = host.client().request("panic", Value::Null, &never).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestFaulted);
        // The connection survives.
        let out = host.client().request("echo", json!("ok"), &never).await.unwrap();
        assert_eq!(out, json!("ok"));
    }

    #[tokio::test]
    async fn peer_close_fails_pending_with_connection_lost() {
        let (host, worker, _) = pair();
        let client = host.client().clone();
        let call = tokio::spawn(async move {
            let never = CancellationSignal::new();
            client.request("wait", Value::Null, &never).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(worker);

        let err = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RpcError::ConnectionLost));
        tokio::time::timeout(Duration::from_secs(5), host.client().closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_connection_rejects_new_requests() {
        let (host, _worker, _) = pair();
        host.client().close();
        let never = CancellationSignal::new();
        let err = host.client().request("echo", Value::Null, &never).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionLost));
        assert!(matches!(
            host.client().notify("anything", &Value::Null),
            Err(RpcError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn close_cancels_incoming_requests() {
        let (host, worker, observed) = pair();
        let client = host.client().clone();
        tokio::spawn(async move {
            let never = CancellationSignal::new();
            let _ = client.request("wait", Value::Null, &never).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), observed.notified.notified())
            .await
            .unwrap();
        assert!(observed.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn notifications_reach_handler() {
        let (host, _worker, observed) = pair();
        host.client().notify("release-pin", &json!({"pin": 1})).unwrap();
        tokio::time::timeout(Duration::from_secs(5), observed.notified.notified())
            .await
            .unwrap();
        assert_eq!(*observed.notes.lock().unwrap(), vec!["release-pin".to_string()]);
    }

    #[tokio::test]
    async fn garbage_input_closes_connection() {
        let (a, b) = tokio::io::duplex(1024);
        let (ar, aw) = tokio::io::split(a);
        let (host, _) = endpoint("host", ar, aw);
        let (_br, mut bw) = tokio::io::split(b);
        tokio::io::AsyncWriteExt::write_all(&mut bw, &[0, 0, 0, 2, b'{', b'{'])
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), host.client().closed())
            .await
            .unwrap();
        assert!(host.client().is_closed());
    }
}
