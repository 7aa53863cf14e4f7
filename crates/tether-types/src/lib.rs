//! Foundation types for tether.
//!
//! tether lets an interactive host process offload semantic analysis to a
//! long-lived worker process while both sides agree on the exact source state
//! being analyzed. This crate provides the identity and signalling types that
//! every other tether crate depends on.
//!
//! # Key Types
//!
//! - [`Checksum`]: Content-addressed identifier (BLAKE3 hash)
//! - [`PinId`]: Opaque handle to a synchronized snapshot held on a worker
//! - [`RequestId`]: Per-connection RPC request identifier
//! - [`ProjectId`] / [`DocumentId`]: Stable workspace identities (UUID v7)
//! - [`OwnerId`]: Owner of a global operation registration
//! - [`SnapshotVersion`]: Monotonic host-side snapshot counter
//! - [`CancellationSignal`]: Cooperative, cloneable cancellation flag

pub mod cancel;
pub mod checksum;
pub mod error;
pub mod ids;

pub use cancel::CancellationSignal;
pub use checksum::Checksum;
pub use error::TypeError;
pub use ids::{DocumentId, OwnerId, PinId, ProjectId, RequestId, SnapshotVersion};
