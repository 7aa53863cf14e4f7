use std::sync::Arc;

use async_trait::async_trait;
use tether_store::{ContentStore, StoreError, StoredObject};
use tether_types::{CancellationSignal, Checksum};

use crate::error::{SyncError, SyncResult};

/// Where missing nodes come from during a sync walk.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch nodes by checksum. Implementations return each requested node
    /// paired with the checksum it was requested by; order is not
    /// significant.
    async fn fetch(
        &self,
        checksums: &[Checksum],
        cancel: &CancellationSignal,
    ) -> SyncResult<Vec<(Checksum, StoredObject)>>;
}

/// Serves nodes straight out of an authoritative store.
///
/// A miss is [`SyncError::ChecksumNotFound`]: the owner of a store never
/// hands out a checksum it cannot serve.
pub struct StoreAssetSource {
    store: Arc<dyn ContentStore>,
}

impl StoreAssetSource {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Synchronous lookup shared with request handlers that serve the same
    /// store over the wire.
    pub fn lookup(&self, checksums: &[Checksum]) -> SyncResult<Vec<(Checksum, StoredObject)>> {
        checksums
            .iter()
            .map(|c| match self.store.require(c) {
                Ok(object) => Ok((*c, object)),
                Err(StoreError::NotFound(c)) => Err(SyncError::ChecksumNotFound(c)),
                Err(e) => Err(e.into()),
            })
            .collect()
    }
}

#[async_trait]
impl AssetSource for StoreAssetSource {
    async fn fetch(
        &self,
        checksums: &[Checksum],
        cancel: &CancellationSignal,
    ) -> SyncResult<Vec<(Checksum, StoredObject)>> {
        if cancel.is_cancelled() {
            return Err(SyncError::Canceled);
        }
        self.lookup(checksums)
    }
}
