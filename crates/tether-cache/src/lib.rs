//! Bounded result cache for tether.
//!
//! Results are keyed by the logical identity of a request plus the checksum
//! of the content it ran against. An edit changes the checksum and so the
//! key; stale entries are never invalidated, they simply stop being hit and
//! age out.

pub mod cache;

pub use cache::{CacheKey, CacheStats, ResultCache, DEFAULT_CAPACITY};
