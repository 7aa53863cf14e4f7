use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tether_store::StoreConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Budget of the authoritative store.
    pub store: StoreConfig,
    /// Worker executable. Defaults to the running executable.
    pub worker_program: Option<PathBuf>,
    /// Arguments that put the executable in worker mode.
    pub worker_args: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            // The host is authoritative and must not lose published nodes.
            store: StoreConfig::unbounded(),
            worker_program: None,
            worker_args: vec!["worker".to_string()],
        }
    }
}
