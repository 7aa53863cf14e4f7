use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_store::{FileStorage, InMemoryContentStore, StoreConfig};

use crate::error::WorkerResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    /// Results kept by the bounded result cache.
    pub cache_capacity: usize,
    /// Directory for the persistent second tier of the content store.
    pub cache_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache_capacity: tether_cache::DEFAULT_CAPACITY,
            cache_dir: None,
        }
    }
}

impl WorkerConfig {
    /// Build the worker's content store, backed by `cache_dir` when set.
    pub fn open_store(&self) -> WorkerResult<Arc<InMemoryContentStore>> {
        let store = InMemoryContentStore::with_config(self.store.clone());
        let store = match &self.cache_dir {
            Some(dir) => store.with_persistence(Arc::new(FileStorage::open(dir)?)),
            None => store,
        };
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::{ContentStore, ObjectKind, StoredObject};

    #[test]
    fn default_config() {
        let c = WorkerConfig::default();
        assert_eq!(c.cache_capacity, 3);
        assert!(c.cache_dir.is_none());
        assert_eq!(c.store, StoreConfig::default());
    }

    #[test]
    fn partial_toml_style_config() {
        let c: WorkerConfig = serde_json::from_str(r#"{"cache_capacity": 8}"#).unwrap();
        assert_eq!(c.cache_capacity, 8);
        assert_eq!(c.store, StoreConfig::default());
    }

    #[test]
    fn persistent_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let object = StoredObject::new(ObjectKind::SourceText, b"fn main() {}".to_vec());
        let checksum = config.open_store().unwrap().put(object.clone()).unwrap();

        let reopened = config.open_store().unwrap();
        assert_eq!(reopened.get(&checksum).unwrap(), Some(object));
    }
}
