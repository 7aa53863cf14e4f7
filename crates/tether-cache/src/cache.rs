use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::Serialize;
use tether_types::Checksum;
use tracing::debug;

/// Default number of cached results.
pub const DEFAULT_CAPACITY: usize = 3;

/// Cache key: what was asked, against which content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Logical identity of the request, e.g. method plus canonical params.
    pub identity: String,
    /// Solution or document checksum the result was computed from.
    pub checksum: Checksum,
}

impl CacheKey {
    pub fn new(identity: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            identity: identity.into(),
            checksum,
        }
    }

    /// Key for `method` called with `params`. JSON object keys are emitted
    /// in sorted order, so equal params always produce equal keys.
    pub fn for_request<P: Serialize>(method: &str, params: &P, checksum: Checksum) -> Self {
        let params = serde_json::to_value(params)
            .map(|v| v.to_string())
            .unwrap_or_default();
        Self::new(format!("{method}:{params}"), checksum)
    }
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<V> {
    entries: LruCache<CacheKey, V>,
    stats: CacheStats,
}

/// Small LRU cache of computed results.
///
/// Inserting a key beyond capacity evicts exactly the least recently
/// touched entry. Both `get` hits and `put` count as touches.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `capacity` results (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a result, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let hit = inner.entries.get(key).cloned();
        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    /// Insert a result. Returns the key evicted to make room, if any.
    pub fn put(&self, key: CacheKey, value: V) -> Option<CacheKey> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let evicted = match inner.entries.push(key.clone(), value) {
            Some((old, _)) if old != key => Some(old),
            _ => None,
        };
        if let Some(old) = &evicted {
            inner.stats.evictions += 1;
            debug!(identity = %old.identity, checksum = %old.checksum, "result evicted");
        }
        evicted
    }

    /// Check for a key without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().expect("lock poisoned").entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("lock poisoned").stats
    }

    pub fn clear(&self) {
        self.inner.lock().expect("lock poisoned").entries.clear();
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("lock poisoned");
        f.debug_struct("ResultCache")
            .field("len", &inner.entries.len())
            .field("capacity", &inner.entries.cap())
            .field("stats", &inner.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name, Checksum::of(b"snapshot"))
    }

    #[test]
    fn default_capacity_is_small() {
        let cache: ResultCache<u32> = ResultCache::default();
        assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
        let zero: ResultCache<u32> = ResultCache::new(0);
        assert_eq!(zero.capacity(), 1);
    }

    #[test]
    fn evicts_least_recently_touched() {
        let cache = ResultCache::new(3);
        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        cache.put(key("c"), 3);
        // Touch "a" so "b" is now the oldest.
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.put(key("d"), 4), Some(key("b")));
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert!(cache.contains(&key("d")));
    }

    #[test]
    fn reinsert_is_not_an_eviction() {
        let cache = ResultCache::new(2);
        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        assert_eq!(cache.put(key("a"), 10), None);
        assert_eq!(cache.get(&key("a")), Some(10));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn new_checksum_is_a_new_key() {
        let cache = ResultCache::new(3);
        let before = CacheKey::new("hover", Checksum::of(b"v1"));
        let after = CacheKey::new("hover", Checksum::of(b"v2"));
        cache.put(before.clone(), "old");
        assert_eq!(cache.get(&after), None);
        assert_eq!(cache.get(&before), Some("old"));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn request_keys_are_canonical() {
        let c = Checksum::of(b"s");
        let a = CacheKey::for_request("stats", &json!({"b": 1, "a": 2}), c);
        let b = CacheKey::for_request("stats", &json!({"a": 2, "b": 1}), c);
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::for_request("other", &json!({"a": 2, "b": 1}), c));
    }

    proptest! {
        /// Against a simple recency-list model: every insert of a new key
        /// into a full cache evicts exactly the model's oldest key.
        #[test]
        fn matches_recency_model(
            capacity in 1usize..6,
            ops in prop::collection::vec((any::<bool>(), 0u8..10), 1..80),
        ) {
            let cache = ResultCache::new(capacity);
            let mut model: Vec<u8> = Vec::new(); // most recent last

            for (is_put, k) in ops {
                let ck = key(&k.to_string());
                if is_put {
                    let evicted = cache.put(ck, k);
                    let expected = if let Some(i) = model.iter().position(|m| *m == k) {
                        model.remove(i);
                        None
                    } else if model.len() == capacity {
                        Some(model.remove(0))
                    } else {
                        None
                    };
                    model.push(k);
                    prop_assert_eq!(evicted, expected.map(|e| key(&e.to_string())));
                } else {
                    let got = cache.get(&ck);
                    if let Some(i) = model.iter().position(|m| *m == k) {
                        model.remove(i);
                        model.push(k);
                        prop_assert_eq!(got, Some(k));
                    } else {
                        prop_assert_eq!(got, None);
                    }
                }
                prop_assert_eq!(cache.len(), model.len());
            }
        }
    }
}
