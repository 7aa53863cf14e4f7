//! Host side of tether.
//!
//! The host owns the authoritative content store. It launches a worker on
//! first use, answers the worker's `fetch-assets` pulls, and hides worker
//! loss behind a retry-once policy: a call that fails with
//! `ConnectionLost` or `SyncFailed` is retried exactly once against a
//! freshly launched worker, then reported.
//!
//! # Key Types
//!
//! - [`RemoteHost`]: Lazily launched worker plus the retry policy
//! - [`HostAssetService`]: Serves `fetch-assets` from the host store
//! - [`WorkerLauncher`]: How workers are started ([`ProcessLauncher`], [`InProcessLauncher`])
//! - [`RemotePin`]: Handle to a snapshot pinned on the current worker
//! - [`HostConfig`]: Worker command line and store settings

pub mod assets;
pub mod config;
pub mod error;
pub mod launcher;
pub mod remote;

pub use assets::HostAssetService;
pub use config::HostConfig;
pub use error::{HostError, HostResult};
pub use launcher::{InProcessLauncher, ProcessLauncher, WorkerLauncher, WorkerStreams};
pub use remote::{RemoteHost, RemotePin};
