use tether_types::{Checksum, DocumentId, ProjectId};

/// Errors from building or assembling snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("store error: {0}")]
    Store(#[from] tether_store::StoreError),

    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("unknown document: {0}")]
    UnknownDocument(DocumentId),

    #[error("project already exists: {0}")]
    DuplicateProject(ProjectId),

    #[error("document already exists: {0}")]
    DuplicateDocument(DocumentId),

    /// A node referenced by the tree was not supplied.
    #[error("missing node {0}")]
    MissingNode(Checksum),

    /// A node decoded but does not fit the tree shape.
    #[error("malformed node {checksum}: {reason}")]
    Malformed { checksum: Checksum, reason: String },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
