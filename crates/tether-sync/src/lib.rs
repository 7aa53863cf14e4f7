//! Snapshot synchronization for tether.
//!
//! The worker reconstructs a [`Snapshot`](tether_snapshot::Snapshot) from
//! its root checksum by pulling only the nodes its own store is missing:
//!
//! 1. If the snapshot is already pinned, reuse it (whole-snapshot hit).
//! 2. Otherwise walk the checksum tree top-down one level at a time,
//!    reading each node locally and fetching the misses in one batch per
//!    level from an [`AssetSource`].
//! 3. Verify every pulled node against its checksum and insert it into
//!    the local store.
//! 4. Assemble the snapshot and pin it in the [`PinTable`].
//!
//! A failure anywhere discards the partial walk; no partially built
//! snapshot ever escapes [`SyncEngine::synchronize`].

pub mod engine;
pub mod error;
pub mod pin;
pub mod source;
pub mod types;
pub mod verifier;

pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use pin::{PinGuard, PinTable};
pub use source::{AssetSource, StoreAssetSource};
pub use types::SyncReport;
pub use verifier::AssetVerifier;
