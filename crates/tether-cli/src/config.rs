use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tether_host::HostConfig;
use tether_worker::WorkerConfig;

/// Contents of the optional TOML configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub host: HostConfig,
    pub worker: WorkerConfig,
}

impl CliConfig {
    /// Load `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(CliConfig::parse("").unwrap(), CliConfig::default());
    }

    #[test]
    fn sections_override_fields() {
        let config = CliConfig::parse(
            r#"
            [host]
            worker_program = "/usr/local/bin/tether"

            [worker]
            cache_capacity = 16
            cache_dir = "/var/cache/tether"

            [worker.store]
            budget_bytes = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(
            config.host.worker_program,
            Some(PathBuf::from("/usr/local/bin/tether"))
        );
        assert_eq!(config.host.worker_args, vec!["worker"]);
        assert_eq!(config.worker.cache_capacity, 16);
        assert_eq!(config.worker.cache_dir, Some(PathBuf::from("/var/cache/tether")));
        assert_eq!(config.worker.store.budget_bytes, 1_048_576);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        fs::write(&path, "[worker]\ncache_capacity = 5\n").unwrap();
        assert_eq!(CliConfig::load(Some(&path)).unwrap().worker.cache_capacity, 5);
        assert!(CliConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
