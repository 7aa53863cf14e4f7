use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_snapshot::Snapshot;
use tether_store::ContentStore;
use tether_types::{Checksum, PinId};
use tracing::{debug, info, warn};

struct PinEntry {
    id: PinId,
    snapshot: Arc<Snapshot>,
    refcount: usize,
    /// Checksums retained in the store for this pin.
    checksums: Vec<Checksum>,
}

#[derive(Default)]
struct PinInner {
    by_checksum: HashMap<Checksum, PinEntry>,
    by_id: HashMap<PinId, Checksum>,
    next_id: u64,
}

/// Reference-counted table of live snapshots on the worker.
///
/// While a snapshot has at least one [`PinGuard`], every checksum in its
/// tree is retained in the store and cannot be evicted. The last guard to
/// drop releases them.
///
/// Pins can also be leased to the peer: [`lease`](Self::lease) parks a guard
/// under its [`PinId`] until [`release_lease`](Self::release_lease) is
/// called, so the host can refer to a synchronized snapshot across calls.
pub struct PinTable {
    store: Arc<dyn ContentStore>,
    inner: Mutex<PinInner>,
    leases: Mutex<HashMap<PinId, Vec<PinGuard>>>,
}

impl PinTable {
    pub fn new(store: Arc<dyn ContentStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(PinInner {
                next_id: 1,
                ..Default::default()
            }),
            leases: Mutex::new(HashMap::new()),
        })
    }

    /// Pin `snapshot`. If a snapshot with the same checksum is already
    /// pinned, its refcount is incremented and the existing instance is
    /// returned in the guard.
    pub fn pin(self: &Arc<Self>, snapshot: Arc<Snapshot>) -> PinGuard {
        let checksum = snapshot.checksum();
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(entry) = inner.by_checksum.get_mut(&checksum) {
            entry.refcount += 1;
            return self.guard(checksum, entry);
        }

        let id = PinId::new(inner.next_id);
        inner.next_id += 1;
        let checksums = snapshot.all_checksums();
        self.store.retain(&checksums);
        info!(%id, checksum = %checksum, nodes = checksums.len(), "snapshot pinned");
        let entry = PinEntry {
            id,
            snapshot,
            refcount: 1,
            checksums,
        };
        let guard = self.guard(checksum, &entry);
        inner.by_id.insert(id, checksum);
        inner.by_checksum.insert(checksum, entry);
        guard
    }

    /// Add a reference to an already pinned snapshot.
    pub fn acquire(self: &Arc<Self>, checksum: &Checksum) -> Option<PinGuard> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let entry = inner.by_checksum.get_mut(checksum)?;
        entry.refcount += 1;
        Some(self.guard(*checksum, entry))
    }

    /// Add a reference to the snapshot behind a pin id.
    pub fn acquire_by_id(self: &Arc<Self>, id: PinId) -> Option<PinGuard> {
        let checksum = {
            let inner = self.inner.lock().expect("lock poisoned");
            *inner.by_id.get(&id)?
        };
        self.acquire(&checksum)
    }

    /// Park `guard` under its id until the peer releases it.
    pub fn lease(&self, guard: PinGuard) -> PinId {
        let id = guard.id();
        self.leases
            .lock()
            .expect("lock poisoned")
            .entry(id)
            .or_default()
            .push(guard);
        id
    }

    /// Drop one lease on `id`. Returns `false` if no lease was held.
    pub fn release_lease(&self, id: PinId) -> bool {
        let guard = {
            let mut leases = self.leases.lock().expect("lock poisoned");
            let Some(held) = leases.get_mut(&id) else {
                return false;
            };
            let guard = held.pop();
            if held.is_empty() {
                leases.remove(&id);
            }
            guard
        };
        // Dropped outside the leases lock; unpinning takes the table lock.
        guard.is_some()
    }

    /// Drop every lease, e.g. when the peer goes away.
    pub fn clear_leases(&self) -> usize {
        let drained: Vec<PinGuard> = {
            let mut leases = self.leases.lock().expect("lock poisoned");
            leases.drain().flat_map(|(_, guards)| guards).collect()
        };
        drained.len()
    }

    /// Current refcount for `checksum`; zero when not pinned.
    pub fn refcount(&self, checksum: &Checksum) -> usize {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.by_checksum.get(checksum).map_or(0, |e| e.refcount)
    }

    /// Number of pinned snapshots.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").by_checksum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(self: &Arc<Self>, checksum: Checksum, entry: &PinEntry) -> PinGuard {
        PinGuard {
            table: Arc::clone(self),
            id: entry.id,
            checksum,
            snapshot: Arc::clone(&entry.snapshot),
        }
    }

    fn unpin(&self, checksum: &Checksum) {
        let released = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let Some(entry) = inner.by_checksum.get_mut(checksum) else {
                warn!(checksum = %checksum, "unpin of unknown snapshot");
                return;
            };
            entry.refcount -= 1;
            debug!(id = %entry.id, refcount = entry.refcount, "pin released");
            if entry.refcount > 0 {
                return;
            }
            let Some(entry) = inner.by_checksum.remove(checksum) else {
                return;
            };
            inner.by_id.remove(&entry.id);
            entry
        };
        self.store.release(&released.checksums);
        info!(id = %released.id, checksum = %checksum, "snapshot unpinned");
    }
}

impl std::fmt::Debug for PinTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinTable").field("pinned", &self.len()).finish()
    }
}

/// One reference to a pinned snapshot. Dropping it decrements the refcount.
pub struct PinGuard {
    table: Arc<PinTable>,
    id: PinId,
    checksum: Checksum,
    snapshot: Arc<Snapshot>,
}

impl PinGuard {
    pub fn id(&self) -> PinId {
        self.id
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

impl Clone for PinGuard {
    fn clone(&self) -> Self {
        self.table
            .acquire(&self.checksum)
            .unwrap_or_else(|| unreachable!("pinned snapshot vanished while a guard is live"))
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.table.unpin(&self.checksum);
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard")
            .field("id", &self.id)
            .field("checksum", &self.checksum)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_snapshot::{ProjectInfo, Workspace};
    use tether_store::{InMemoryContentStore, StoreConfig};

    fn snapshot_with(text: &str) -> (Arc<InMemoryContentStore>, Arc<Snapshot>) {
        let store = Arc::new(InMemoryContentStore::new());
        let mut ws = Workspace::new(store.clone()).unwrap();
        let p = ws.add_project(ProjectInfo::new("p", "text")).unwrap();
        ws.add_document(p, "a", text).unwrap();
        (store, ws.current())
    }

    #[test]
    fn pin_and_refcount() {
        let (_, snapshot) = snapshot_with("hello");
        let store = Arc::new(InMemoryContentStore::new());
        let table = PinTable::new(store.clone());

        let g1 = table.pin(snapshot.clone());
        let g2 = table.pin(snapshot.clone());
        let g3 = table.acquire(&snapshot.checksum()).unwrap();
        assert_eq!(g1.id(), g2.id());
        assert_eq!(table.refcount(&snapshot.checksum()), 3);
        assert_eq!(store.stats().retained, snapshot.all_checksums().len());

        drop(g1);
        drop(g2);
        assert_eq!(table.refcount(&snapshot.checksum()), 1);
        drop(g3);
        assert_eq!(table.refcount(&snapshot.checksum()), 0);
        assert!(table.is_empty());
        assert_eq!(store.stats().retained, 0);
    }

    #[test]
    fn repin_after_release_gets_new_id() {
        let (_, snapshot) = snapshot_with("x");
        let table = PinTable::new(Arc::new(InMemoryContentStore::new()));
        let first = table.pin(snapshot.clone()).id();
        let second = table.pin(snapshot).id();
        assert_ne!(first, second);
    }

    #[test]
    fn pinned_entries_survive_memory_pressure() {
        let (host, snapshot) = snapshot_with("pinned content");
        let store = Arc::new(InMemoryContentStore::with_config(StoreConfig::with_budget(1)));
        let table = PinTable::new(store.clone());
        let guard = table.pin(snapshot.clone());
        for (_, object) in snapshot.nodes() {
            store.put(object).unwrap();
        }
        // Unrelated content forces eviction pressure.
        for i in 0..20 {
            store
                .put(tether_store::StoredObject::new(
                    tether_store::ObjectKind::SourceText,
                    format!("filler {i}").into_bytes(),
                ))
                .unwrap();
        }
        for checksum in snapshot.all_checksums() {
            assert!(store.contains(&checksum).unwrap());
        }
        drop(guard);
        for checksum in snapshot.all_checksums() {
            assert!(!store.contains(&checksum).unwrap());
        }
        drop(host);
    }

    #[test]
    fn leases_by_id() {
        let (_, snapshot) = snapshot_with("lease");
        let table = PinTable::new(Arc::new(InMemoryContentStore::new()));
        let id = table.lease(table.pin(snapshot.clone()));
        let again = table.lease(table.pin(snapshot.clone()));
        assert_eq!(id, again);
        assert_eq!(table.refcount(&snapshot.checksum()), 2);

        let via_id = table.acquire_by_id(id).unwrap();
        assert_eq!(via_id.checksum(), snapshot.checksum());
        drop(via_id);

        assert!(table.release_lease(id));
        assert!(table.release_lease(id));
        assert!(!table.release_lease(id));
        assert!(table.acquire_by_id(id).is_none());
    }

    #[test]
    fn clear_leases_unpins_everything() {
        let (_, snapshot) = snapshot_with("gone");
        let table = PinTable::new(Arc::new(InMemoryContentStore::new()));
        table.lease(table.pin(snapshot.clone()));
        table.lease(table.pin(snapshot));
        assert_eq!(table.clear_leases(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn cloned_guard_holds_its_own_reference() {
        let (_, snapshot) = snapshot_with("clone");
        let table = PinTable::new(Arc::new(InMemoryContentStore::new()));
        let g = table.pin(snapshot.clone());
        let c = g.clone();
        drop(g);
        assert_eq!(table.refcount(&snapshot.checksum()), 1);
        drop(c);
        assert!(table.is_empty());
    }
}
