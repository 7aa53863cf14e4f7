use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tether_snapshot::{children, Snapshot};
use tether_store::{ContentStore, StoredObject};
use tether_types::{CancellationSignal, Checksum, SnapshotVersion};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::pin::{PinGuard, PinTable};
use crate::source::AssetSource;
use crate::types::SyncReport;
use crate::verifier::AssetVerifier;

/// Retains the checksums a walk has touched until the walk ends, so nodes
/// inserted early cannot be evicted before the snapshot is pinned.
struct WalkRetain<'a> {
    store: &'a dyn ContentStore,
    checksums: Vec<Checksum>,
}

impl<'a> WalkRetain<'a> {
    fn new(store: &'a dyn ContentStore) -> Self {
        Self {
            store,
            checksums: Vec::new(),
        }
    }

    fn add(&mut self, level: &[Checksum]) {
        self.store.retain(level);
        self.checksums.extend_from_slice(level);
    }
}

impl Drop for WalkRetain<'_> {
    fn drop(&mut self) {
        self.store.release(&self.checksums);
    }
}

/// Reconstructs snapshots on the worker by pulling missing nodes.
pub struct SyncEngine {
    store: Arc<dyn ContentStore>,
    source: Arc<dyn AssetSource>,
    pins: Arc<PinTable>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        source: Arc<dyn AssetSource>,
        pins: Arc<PinTable>,
    ) -> Self {
        Self {
            store,
            source,
            pins,
        }
    }

    pub fn pins(&self) -> &Arc<PinTable> {
        &self.pins
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Resolve and pin the snapshot rooted at `root`.
    ///
    /// On any error the partially walked tree is discarded. Nodes already
    /// inserted into the store stay there (they are valid content), but no
    /// snapshot is assembled or pinned.
    pub async fn synchronize(
        &self,
        root: Checksum,
        version: SnapshotVersion,
        cancel: &CancellationSignal,
    ) -> SyncResult<(PinGuard, SyncReport)> {
        if let Some(guard) = self.pins.acquire(&root) {
            debug!(checksum = %root, "whole-snapshot hit");
            return Ok((guard, SyncReport::whole_snapshot_hit()));
        }

        let mut report = SyncReport::default();
        let mut walk = WalkRetain::new(self.store.as_ref());
        let resolved = match self.walk(root, cancel, &mut walk, &mut report).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(checksum = %root, error = %e, fetched = report.fetched, "synchronization failed");
                return Err(e);
            }
        };
        report.visited = resolved.len();

        let snapshot = Snapshot::assemble(root, version, |c| Ok(resolved.get(c).cloned()))?;
        let guard = self.pins.pin(Arc::new(snapshot));
        drop(walk);

        info!(
            checksum = %root,
            visited = report.visited,
            fetched = report.fetched,
            reused = report.reused,
            "synchronized snapshot"
        );
        Ok((guard, report))
    }

    /// Walk the tree top-down, one level per round trip.
    async fn walk(
        &self,
        root: Checksum,
        cancel: &CancellationSignal,
        walk: &mut WalkRetain<'_>,
        report: &mut SyncReport,
    ) -> SyncResult<HashMap<Checksum, StoredObject>> {
        let mut resolved = HashMap::new();
        let mut seen = HashSet::from([root]);
        let mut level = vec![root];

        while !level.is_empty() {
            if cancel.is_cancelled() {
                return Err(SyncError::Canceled);
            }
            walk.add(&level);

            let (mut found, missing) = AssetVerifier::partition_local(self.store.as_ref(), &level)?;
            report.reused += found.len();

            if !missing.is_empty() {
                debug!(count = missing.len(), "pulling missing nodes");
                let received = self.source.fetch(&missing, cancel).await?;
                let verified = AssetVerifier::verify_batch(&missing, received)?;
                report.fetched += verified.len();
                for (_, object) in &verified {
                    self.store.put(object.clone())?;
                }
                found.extend(verified);
            }

            let mut next = Vec::new();
            for (checksum, object) in found {
                for child in children(&checksum, &object)? {
                    if seen.insert(child) {
                        next.push(child);
                    }
                }
                resolved.insert(checksum, object);
            }
            level = next;
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pins", &self.pins)
            .finish()
    }
}
