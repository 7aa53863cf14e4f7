use serde::{Deserialize, Serialize};

/// Eviction configuration for [`InMemoryContentStore`](crate::InMemoryContentStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Memory budget in bytes. Unpinned entries are evicted least recently
    /// used first once the total exceeds this.
    pub budget_bytes: u64,
    /// Objects at or below this size are cheap to keep and never evicted.
    pub small_object_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 256 * 1024 * 1024, // 256 MiB
            small_object_bytes: 0,
        }
    }
}

impl StoreConfig {
    /// A store that never evicts.
    pub fn unbounded() -> Self {
        Self {
            budget_bytes: u64::MAX,
            small_object_bytes: 0,
        }
    }

    /// A store with the given byte budget.
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            ..Default::default()
        }
    }
}
