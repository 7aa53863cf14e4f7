use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_protocol::methods::FETCH_ASSETS;
use tether_protocol::{
    decode_params, encode_params, Asset, ErrorCode, FetchAssetsParams, FetchAssetsResult,
    RemoteError, MAX_ASSET_BATCH_BYTES,
};
use tether_rpc::RequestHandler;
use tether_store::ContentStore;
use tether_sync::{StoreAssetSource, SyncError};
use tether_types::CancellationSignal;
use tracing::{debug, error};

/// Answers a worker's `fetch-assets` pulls out of the host's store.
///
/// The host is authoritative: a miss means it handed out a checksum it
/// cannot serve, which is reported as `checksum-not-found`. Each reply
/// carries at most `batch_bytes` of payload (but always at least one
/// asset); the worker asks again for the remainder.
pub struct HostAssetService {
    source: StoreAssetSource,
    served: Arc<AtomicUsize>,
    batch_bytes: usize,
}

impl HostAssetService {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self::with_counter(store, Arc::new(AtomicUsize::new(0)))
    }

    /// Share a counter of served assets with the caller.
    pub fn with_counter(store: Arc<dyn ContentStore>, served: Arc<AtomicUsize>) -> Self {
        Self {
            source: StoreAssetSource::new(store),
            served,
            batch_bytes: MAX_ASSET_BATCH_BYTES,
        }
    }

    pub fn with_batch_bytes(mut self, batch_bytes: usize) -> Self {
        self.batch_bytes = batch_bytes;
        self
    }

    pub fn served(&self) -> usize {
        self.served.load(Ordering::Relaxed)
    }

    fn fetch(&self, params: FetchAssetsParams) -> Result<FetchAssetsResult, RemoteError> {
        let found = self.source.lookup(&params.checksums).map_err(|e| match e {
            SyncError::ChecksumNotFound(c) => {
                error!(checksum = %c, "worker requested content the host does not have");
                RemoteError::new(
                    ErrorCode::ChecksumNotFound,
                    format!("checksum not found on host: {}", c.to_hex()),
                )
            }
            other => RemoteError::new(ErrorCode::Internal, other.to_string()),
        })?;
        let mut assets = Vec::new();
        let mut bytes = 0;
        for (checksum, object) in &found {
            if !assets.is_empty() && bytes + object.data.len() > self.batch_bytes {
                break;
            }
            bytes += object.data.len();
            assets.push(Asset::from_object(*checksum, object));
        }
        self.served.fetch_add(assets.len(), Ordering::Relaxed);
        debug!(count = assets.len(), requested = found.len(), bytes, "served assets");
        Ok(FetchAssetsResult { assets })
    }
}

#[async_trait]
impl RequestHandler for HostAssetService {
    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        _cancel: CancellationSignal,
    ) -> Result<Value, RemoteError> {
        match method {
            FETCH_ASSETS => {
                let params = decode_params(params)
                    .map_err(|e| RemoteError::new(ErrorCode::InvalidParams, e.to_string()))?;
                let result = self.fetch(params)?;
                encode_params(&result).map_err(|e| RemoteError::new(ErrorCode::Internal, e.to_string()))
            }
            other => Err(RemoteError::new(
                ErrorCode::MethodNotFound,
                format!("host does not serve {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_store::{InMemoryContentStore, ObjectKind, StoredObject};
    use tether_types::Checksum;

    fn service() -> (HostAssetService, Checksum) {
        let store = Arc::new(InMemoryContentStore::new());
        let c = store
            .put(StoredObject::new(ObjectKind::SourceText, b"body".to_vec()))
            .unwrap();
        (HostAssetService::new(store), c)
    }

    #[tokio::test]
    async fn serves_and_counts() {
        let (svc, c) = service();
        let params = encode_params(&FetchAssetsParams { checksums: vec![c] }).unwrap();
        let value = svc
            .handle_request(FETCH_ASSETS, params, CancellationSignal::new())
            .await
            .unwrap();
        let result: FetchAssetsResult = decode_params(value).unwrap();
        assert_eq!(result.assets.len(), 1);
        assert_eq!(result.assets[0].to_object().unwrap().compute_checksum(), c);
        assert_eq!(svc.served(), 1);
    }

    async fn fetch_all(svc: &HostAssetService, checksums: &[Checksum]) -> Vec<Checksum> {
        let params = encode_params(&FetchAssetsParams { checksums: checksums.to_vec() }).unwrap();
        let value = svc
            .handle_request(FETCH_ASSETS, params, CancellationSignal::new())
            .await
            .unwrap();
        let result: FetchAssetsResult = decode_params(value).unwrap();
        result.assets.iter().map(|a| a.checksum).collect()
    }

    #[tokio::test]
    async fn replies_are_bounded_by_batch_bytes() {
        let store = Arc::new(InMemoryContentStore::new());
        let checksums: Vec<_> = (0..5u8)
            .map(|i| {
                store
                    .put(StoredObject::new(ObjectKind::SourceText, vec![i; 100]))
                    .unwrap()
            })
            .collect();

        let svc = HostAssetService::new(store.clone()).with_batch_bytes(250);
        assert_eq!(fetch_all(&svc, &checksums).await, checksums[..2].to_vec());
        assert_eq!(fetch_all(&svc, &checksums[2..]).await, checksums[2..4].to_vec());
        assert_eq!(svc.served(), 4);

        // An asset larger than the budget still goes out on its own.
        let svc = HostAssetService::new(store).with_batch_bytes(10);
        assert_eq!(fetch_all(&svc, &checksums).await, vec![checksums[0]]);
    }

    #[tokio::test]
    async fn miss_names_the_checksum() {
        let (svc, _) = service();
        let absent = Checksum::of(b"absent");
        let params = encode_params(&FetchAssetsParams { checksums: vec![absent] }).unwrap();
        let err = svc
            .handle_request(FETCH_ASSETS, params, CancellationSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ChecksumNotFound);
        assert!(err.message.contains(&absent.to_hex()));
        assert_eq!(svc.served(), 0);
    }

    #[tokio::test]
    async fn rejects_other_methods_and_bad_params() {
        let (svc, _) = service();
        let err = svc
            .handle_request("invoke", Value::Null, CancellationSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        let err = svc
            .handle_request(FETCH_ASSETS, json!({"checksums": 7}), CancellationSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }
}
