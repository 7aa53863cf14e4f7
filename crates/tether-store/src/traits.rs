use tether_types::Checksum;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;

/// Point-in-time counters for a content store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of entries currently held in memory.
    pub entries: usize,
    /// Total bytes across held entries.
    pub bytes: u64,
    /// Number of distinct checksums currently retained by pins.
    pub retained: usize,
    /// Entries evicted since creation.
    pub evictions: u64,
}

/// Content-addressed store mapping a checksum to immutable serialized content.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written; the same content always maps to
///   the same checksum.
/// - `put` is idempotent: re-inserting an existing checksum is a no-op.
/// - `get` never blocks on the network. A miss is reported as `Ok(None)`;
///   what a miss means (pull from the host, or fatal inconsistency) is the
///   caller's decision.
/// - A retained checksum is never evicted until every retain is released.
pub trait ContentStore: Send + Sync {
    /// Read an object by checksum, marking it as recently used.
    fn get(&self, checksum: &Checksum) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its checksum.
    ///
    /// The checksum is computed from the object's kind and bytes. If the
    /// object already exists this is a no-op.
    fn put(&self, object: StoredObject) -> StoreResult<Checksum>;

    /// Check whether a checksum is present without touching its recency.
    fn contains(&self, checksum: &Checksum) -> StoreResult<bool>;

    /// Protect checksums from eviction. Retains nest: each call must be
    /// paired with one [`release`](Self::release).
    fn retain(&self, checksums: &[Checksum]);

    /// Undo one [`retain`](Self::retain) for each checksum.
    fn release(&self, checksums: &[Checksum]);

    /// Current counters.
    fn stats(&self) -> StoreStats;

    /// Read an object the caller is authoritative for.
    ///
    /// A miss is an internal inconsistency and reported as
    /// [`StoreError::NotFound`].
    fn require(&self, checksum: &Checksum) -> StoreResult<StoredObject> {
        self.get(checksum)?
            .ok_or(StoreError::NotFound(*checksum))
    }
}
