use std::collections::HashSet;

use async_trait::async_trait;
use tether_protocol::methods::FETCH_ASSETS;
use tether_protocol::{ErrorCode, FetchAssetsParams, FetchAssetsResult};
use tether_rpc::{RpcClient, RpcError};
use tether_store::StoredObject;
use tether_sync::{AssetSource, SyncError, SyncResult};
use tether_types::{CancellationSignal, Checksum};
use tracing::debug;

/// Pulls missing nodes from the host over the worker's connection.
///
/// Each fetch is a nested request on the same connection; it blocks only
/// the request that triggered the walk.
pub struct RpcAssetSource {
    client: RpcClient,
}

impl RpcAssetSource {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetSource for RpcAssetSource {
    /// The host may answer with a bounded prefix of the request; ask again
    /// for whatever is still outstanding until every asset has arrived.
    async fn fetch(
        &self,
        checksums: &[Checksum],
        cancel: &CancellationSignal,
    ) -> SyncResult<Vec<(Checksum, StoredObject)>> {
        let mut remaining: Vec<Checksum> = checksums.to_vec();
        let mut fetched = Vec::with_capacity(checksums.len());
        let mut round_trips = 0;
        while !remaining.is_empty() {
            let params = FetchAssetsParams {
                checksums: remaining.clone(),
            };
            let result: FetchAssetsResult = self
                .client
                .call(FETCH_ASSETS, &params, cancel)
                .await
                .map_err(|e| sync_error(e, &remaining))?;
            round_trips += 1;
            let outstanding = remaining.len();
            let received: HashSet<Checksum> = result.assets.iter().map(|a| a.checksum).collect();
            remaining.retain(|c| !received.contains(c));
            if remaining.len() == outstanding {
                return Err(SyncError::TransportError(format!(
                    "host reply made no progress on {outstanding} outstanding assets"
                )));
            }
            for asset in &result.assets {
                let object = asset
                    .to_object()
                    .map_err(|e| SyncError::TransportError(e.to_string()))?;
                fetched.push((asset.checksum, object));
            }
        }
        debug!(requested = checksums.len(), received = fetched.len(), round_trips, "assets fetched");
        Ok(fetched)
    }
}

fn sync_error(e: RpcError, requested: &[Checksum]) -> SyncError {
    match e {
        RpcError::ConnectionLost => SyncError::ConnectionLost,
        RpcError::Canceled => SyncError::Canceled,
        RpcError::Remote(remote) if remote.code == ErrorCode::ChecksumNotFound => {
            let missing = requested
                .iter()
                .find(|c| remote.message.contains(&c.to_hex()))
                .or_else(|| requested.first());
            match missing {
                Some(c) => SyncError::ChecksumNotFound(*c),
                None => SyncError::TransportError(remote.to_string()),
            }
        }
        RpcError::Remote(remote) if remote.code == ErrorCode::ConnectionLost => {
            SyncError::ConnectionLost
        }
        other => SyncError::TransportError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tether_protocol::{decode_params, encode_params, Asset, RemoteError};
    use tether_rpc::{RequestHandler, RpcConnection};
    use tether_store::{ContentStore, InMemoryContentStore, ObjectKind};
    use tether_sync::StoreAssetSource;

    /// Minimal host: answers fetch-assets out of a store, at most
    /// `per_reply` assets at a time.
    struct AssetHost {
        source: StoreAssetSource,
        per_reply: usize,
        replies: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RequestHandler for AssetHost {
        async fn handle_request(
            &self,
            method: &str,
            params: Value,
            _cancel: CancellationSignal,
        ) -> Result<Value, RemoteError> {
            assert_eq!(method, FETCH_ASSETS);
            let params: FetchAssetsParams = decode_params(params).unwrap();
            let found = self.source.lookup(&params.checksums).map_err(|e| match e {
                SyncError::ChecksumNotFound(c) => {
                    RemoteError::new(ErrorCode::ChecksumNotFound, format!("missing {}", c.to_hex()))
                }
                other => RemoteError::new(ErrorCode::Internal, other.to_string()),
            })?;
            self.replies.fetch_add(1, Ordering::SeqCst);
            let assets = found
                .iter()
                .take(self.per_reply)
                .map(|(c, o)| Asset::from_object(*c, o))
                .collect();
            Ok(encode_params(&FetchAssetsResult { assets }).unwrap())
        }
    }

    struct Silent;

    #[async_trait]
    impl RequestHandler for Silent {
        async fn handle_request(
            &self,
            _method: &str,
            _params: Value,
            _cancel: CancellationSignal,
        ) -> Result<Value, RemoteError> {
            Err(RemoteError::new(ErrorCode::MethodNotFound, "worker serves no requests here"))
        }
    }

    fn pair(store: Arc<InMemoryContentStore>) -> (RpcConnection, RpcConnection) {
        pair_limited(store, usize::MAX, Arc::new(AtomicUsize::new(0)))
    }

    fn pair_limited(
        store: Arc<InMemoryContentStore>,
        per_reply: usize,
        replies: Arc<AtomicUsize>,
    ) -> (RpcConnection, RpcConnection) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let host = RpcConnection::spawn("host", ar, aw, move |_| AssetHost {
            source: StoreAssetSource::new(store),
            per_reply,
            replies,
        });
        let worker = RpcConnection::spawn("worker", br, bw, |_| Silent);
        (host, worker)
    }

    #[tokio::test]
    async fn fetches_over_rpc() {
        let store = Arc::new(InMemoryContentStore::new());
        let object = StoredObject::new(ObjectKind::SourceText, b"let x = 1;".to_vec());
        let checksum = store.put(object.clone()).unwrap();
        let (_host, worker) = pair(store);

        let source = RpcAssetSource::new(worker.client().clone());
        let got = source
            .fetch(&[checksum], &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(got, vec![(checksum, object)]);
    }

    #[tokio::test]
    async fn partial_replies_are_completed() {
        let store = Arc::new(InMemoryContentStore::new());
        let checksums: Vec<_> = (0..5u8)
            .map(|i| {
                store
                    .put(StoredObject::new(ObjectKind::SourceText, vec![i; 32]))
                    .unwrap()
            })
            .collect();
        let replies = Arc::new(AtomicUsize::new(0));
        let (_host, worker) = pair_limited(store, 2, replies.clone());

        let source = RpcAssetSource::new(worker.client().clone());
        let got = source
            .fetch(&checksums, &CancellationSignal::new())
            .await
            .unwrap();
        let got: Vec<_> = got.into_iter().map(|(c, _)| c).collect();
        assert_eq!(got, checksums);
        assert_eq!(replies.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_reply_is_a_transport_error() {
        let store = Arc::new(InMemoryContentStore::new());
        let c = store
            .put(StoredObject::new(ObjectKind::SourceText, b"x".to_vec()))
            .unwrap();
        let (_host, worker) = pair_limited(store, 0, Arc::new(AtomicUsize::new(0)));

        let source = RpcAssetSource::new(worker.client().clone());
        let err = source.fetch(&[c], &CancellationSignal::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportError(_)));
    }

    #[tokio::test]
    async fn host_miss_names_the_checksum() {
        let store = Arc::new(InMemoryContentStore::new());
        let present = store
            .put(StoredObject::new(ObjectKind::SourceText, b"here".to_vec()))
            .unwrap();
        let absent = Checksum::of(b"absent");
        let (_host, worker) = pair(store);

        let source = RpcAssetSource::new(worker.client().clone());
        let err = source
            .fetch(&[present, absent], &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ChecksumNotFound(c) if c == absent));
    }

    #[tokio::test]
    async fn closed_connection_is_connection_lost() {
        let store = Arc::new(InMemoryContentStore::new());
        let (host, worker) = pair(store);
        host.shutdown().await;
        worker.client().closed().await;

        let source = RpcAssetSource::new(worker.client().clone());
        let err = source
            .fetch(&[Checksum::of(b"x")], &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConnectionLost));
    }
}
