//! Content-addressed store for tether.
//!
//! Every node of a snapshot's checksum tree -- source texts, option sets,
//! reference lists, documents, projects, solutions -- is stored as an
//! immutable object identified by its BLAKE3 checksum (domain-separated by
//! node kind). The host's store is authoritative; a worker's store is a cache
//! filled by pulling missing nodes from the host.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`InMemoryContentStore`] -- LRU-ordered store with a byte budget,
//!   optionally backed by a [`PersistentStorage`] second tier
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. `put` is idempotent: re-inserting an existing checksum is a no-op.
//! 3. Concurrent reads and writes are safe; concurrent `put` of the same
//!    checksum is race-free.
//! 4. Entries retained by a live pin are never evicted, whatever their recency.
//! 5. The store never interprets object contents.

pub mod config;
pub mod error;
pub mod memory;
pub mod object;
pub mod persistent;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryContentStore;
pub use object::{ObjectKind, StoredObject};
pub use persistent::{FileStorage, PersistentStorage};
pub use traits::{ContentStore, StoreStats};
