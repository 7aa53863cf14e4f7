//! Snapshot model for tether.
//!
//! A [`Snapshot`] is an immutable, versioned view of a workspace: a solution
//! made of projects, each with an option set, a reference list and
//! documents. Its identity is a Merkle-style checksum tree over the content
//! store:
//!
//! ```text
//! solution ──► project ──► options
//!                    ├───► references
//!                    └───► document ──► source text
//! ```
//!
//! Every node is serialized canonically and addressed by the checksum of
//! that serialization, so structurally identical workspaces always share a
//! root checksum and an edit only re-hashes the path from the edited leaf to
//! the root. Cross-project links are [`ProjectId`](tether_types::ProjectId)
//! values, never pointers, which keeps the graph trivially serializable.
//!
//! The host owns a mutable [`Workspace`] that publishes new snapshots into
//! its store; the worker reassembles snapshots from pulled nodes with
//! [`Snapshot::assemble`].

pub mod error;
pub mod node;
pub mod snapshot;
pub mod workspace;

pub use error::{SnapshotError, SnapshotResult};
pub use node::{children, DocumentNode, OptionSet, ProjectNode, ReferenceList, SolutionNode};
pub use snapshot::{DocumentSnapshot, ProjectSnapshot, Snapshot};
pub use workspace::{ProjectInfo, Workspace};
