use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tether_types::Checksum;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::persistent::PersistentStorage;
use crate::traits::{ContentStore, StoreStats};

/// Mutable state behind the store's lock.
struct Inner {
    /// Entries in recency order (most recently used first).
    entries: LruCache<Checksum, StoredObject>,
    /// Total bytes across `entries`.
    bytes: u64,
    /// Nested retain counts. A checksum may be retained before it arrives.
    retains: HashMap<Checksum, usize>,
    evictions: u64,
}

impl Inner {
    fn insert(&mut self, checksum: Checksum, object: StoredObject) -> bool {
        if self.entries.contains(&checksum) {
            return false;
        }
        self.bytes += object.size();
        self.entries.put(checksum, object);
        true
    }

    /// Evict least recently used entries until the total fits the budget.
    ///
    /// Retained and small entries are skipped; if only those remain the store
    /// stays over budget.
    fn evict_over_budget(&mut self, config: &StoreConfig) -> usize {
        let mut evicted = 0;
        while self.bytes > config.budget_bytes {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(checksum, object)| {
                    !self.retains.contains_key(*checksum)
                        && object.size() > config.small_object_bytes
                })
                .map(|(checksum, _)| *checksum);
            let Some(victim) = victim else { break };
            if let Some(object) = self.entries.pop(&victim) {
                self.bytes -= object.size();
                self.evictions += 1;
                evicted += 1;
                debug!(checksum = %victim.short_hex(), size = object.size(), "evicted");
            }
        }
        evicted
    }
}

/// Serialized form of an object in the persistent tier.
#[derive(Serialize, Deserialize)]
struct PersistedObject {
    kind: ObjectKind,
    data: Vec<u8>,
}

/// In-memory content store with LRU eviction under a byte budget.
///
/// Entries are held behind a `Mutex` (reads update recency). When a
/// [`PersistentStorage`] is attached, writes go through to it and memory
/// misses are read back from it, verified, and re-admitted.
pub struct InMemoryContentStore {
    inner: Mutex<Inner>,
    config: StoreConfig,
    persistence: Option<Arc<dyn PersistentStorage>>,
}

impl InMemoryContentStore {
    /// Create a new empty store that never evicts.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::unbounded())
    }

    /// Create a new empty store with the given eviction configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                retains: HashMap::new(),
                evictions: 0,
            }),
            config,
            persistence: None,
        }
    }

    /// Attach a persistent second tier.
    pub fn with_persistence(mut self, storage: Arc<dyn PersistentStorage>) -> Self {
        self.persistence = Some(storage);
        self
    }

    /// The eviction configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of objects currently held in memory.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    /// Returns `true` if no objects are held in memory.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all objects held in memory.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").bytes
    }

    /// Return a sorted list of all checksums held in memory.
    pub fn all_checksums(&self) -> Vec<Checksum> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut ids: Vec<Checksum> = inner.entries.iter().map(|(c, _)| *c).collect();
        ids.sort();
        ids
    }

    /// Drop every in-memory entry. Retain counts are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.entries.clear();
        inner.bytes = 0;
    }

    fn read_persisted(&self, checksum: &Checksum) -> StoreResult<Option<StoredObject>> {
        let Some(storage) = &self.persistence else {
            return Ok(None);
        };
        let Some(raw) = storage.get(&checksum.to_hex())? else {
            return Ok(None);
        };
        let persisted: PersistedObject =
            bincode::deserialize(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let object = StoredObject::new(persisted.kind, persisted.data);
        if let Err(e) = object.verify(checksum) {
            warn!(checksum = %checksum.short_hex(), error = %e, "ignoring mismatched persisted object");
            return Ok(None);
        }
        Ok(Some(object))
    }

    fn write_persisted(&self, checksum: &Checksum, object: &StoredObject) {
        let Some(storage) = &self.persistence else {
            return;
        };
        let encoded = bincode::serialize(&PersistedObject {
            kind: object.kind,
            data: object.data.to_vec(),
        });
        let result = match encoded {
            Ok(bytes) => storage.put(&checksum.to_hex(), &bytes),
            Err(e) => Err(StoreError::Serialization(e.to_string())),
        };
        // The memory tier already holds the object; persistence is best effort.
        if let Err(e) = result {
            warn!(checksum = %checksum.short_hex(), error = %e, "failed to persist object");
        }
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn get(&self, checksum: &Checksum) -> StoreResult<Option<StoredObject>> {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if let Some(object) = inner.entries.get(checksum) {
                return Ok(Some(object.clone()));
            }
        }

        let Some(object) = self.read_persisted(checksum)? else {
            return Ok(None);
        };
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.insert(*checksum, object.clone());
        inner.evict_over_budget(&self.config);
        Ok(Some(object))
    }

    fn put(&self, object: StoredObject) -> StoreResult<Checksum> {
        let checksum = object.compute_checksum();
        if checksum.is_null() {
            return Err(StoreError::NullChecksum);
        }
        let inserted = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            // Idempotent: content-addressing guarantees the same checksum
            // always maps to the same content.
            let inserted = inner.insert(checksum, object.clone());
            if inserted {
                inner.evict_over_budget(&self.config);
            }
            inserted
        };
        if inserted {
            self.write_persisted(&checksum, &object);
        }
        Ok(checksum)
    }

    fn contains(&self, checksum: &Checksum) -> StoreResult<bool> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner.entries.contains(checksum))
    }

    fn retain(&self, checksums: &[Checksum]) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        for checksum in checksums {
            *inner.retains.entry(*checksum).or_insert(0) += 1;
        }
    }

    fn release(&self, checksums: &[Checksum]) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        for checksum in checksums {
            let remaining = match inner.retains.get_mut(checksum) {
                Some(count) => {
                    *count -= 1;
                    *count
                }
                None => {
                    warn!(checksum = %checksum.short_hex(), "release without retain");
                    continue;
                }
            };
            if remaining == 0 {
                inner.retains.remove(checksum);
            }
        }
        inner.evict_over_budget(&self.config);
    }

    fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().expect("lock poisoned");
        StoreStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            retained: inner.retains.len(),
            evictions: inner.evictions,
        }
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("InMemoryContentStore")
            .field("entries", &stats.entries)
            .field("bytes", &stats.bytes)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
