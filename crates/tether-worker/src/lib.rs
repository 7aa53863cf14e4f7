//! Worker side of tether.
//!
//! A worker serves one connection from a host. Every request names the
//! snapshot it runs against by root checksum; the worker resolves that
//! snapshot by pulling missing nodes from the host, pins it for the
//! duration of the call, and runs the request under the dispatcher's
//! mutating / read-only exclusion rules.
//!
//! # Key Types
//!
//! - [`LanguageService`]: The analysis capability the worker hosts
//! - [`WorkerService`]: Request handler for one host connection
//! - [`RpcAssetSource`]: Pulls missing nodes from the host over RPC
//! - [`TextStatsService`]: Built-in text statistics service
//! - [`WorkerConfig`]: Store, cache and persistence settings

pub mod config;
pub mod error;
pub mod service;
pub mod source;
pub mod stats;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use service::{LanguageService, MethodDescriptor};
pub use source::RpcAssetSource;
pub use stats::TextStatsService;
pub use worker::{serve, serve_stdio, WorkerService};
