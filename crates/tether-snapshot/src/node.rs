use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tether_store::{ObjectKind, StoredObject};
use tether_types::{Checksum, DocumentId, ProjectId};

use crate::error::{SnapshotError, SnapshotResult};

// ---------------------------------------------------------------------------
// Leaf payloads
// ---------------------------------------------------------------------------

/// A project's compilation options. Keys are kept sorted so the
/// serialization, and therefore the checksum, is canonical.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSet(BTreeMap<String, String>);

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_object(&self) -> SnapshotResult<StoredObject> {
        Ok(StoredObject::encode_json(ObjectKind::Options, self)?)
    }
}

/// A project's reference identities: other projects in the same solution
/// (by id) and external metadata references (by name).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceList {
    pub projects: Vec<ProjectId>,
    pub metadata: Vec<String>,
}

impl ReferenceList {
    /// Sorted, de-duplicated reference list.
    pub fn new(mut projects: Vec<ProjectId>, mut metadata: Vec<String>) -> Self {
        projects.sort();
        projects.dedup();
        metadata.sort();
        metadata.dedup();
        Self { projects, metadata }
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.metadata.is_empty()
    }

    pub fn to_object(&self) -> SnapshotResult<StoredObject> {
        Ok(StoredObject::encode_json(ObjectKind::References, self)?)
    }
}

// ---------------------------------------------------------------------------
// Interior nodes
// ---------------------------------------------------------------------------

/// Document attributes plus the checksum of its source text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: DocumentId,
    pub name: String,
    pub text: Checksum,
}

/// Project shape: attributes plus checksums of its children. Documents are
/// listed in `DocumentId` order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: ProjectId,
    pub name: String,
    pub language: String,
    pub options: Checksum,
    pub references: Checksum,
    pub documents: Vec<Checksum>,
}

/// Solution root: project checksums in `ProjectId` order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionNode {
    pub projects: Vec<Checksum>,
}

macro_rules! node_codec {
    ($ty:ty, $kind:expr) => {
        impl $ty {
            /// Canonical stored form of this node.
            pub fn to_object(&self) -> SnapshotResult<StoredObject> {
                Ok(StoredObject::encode_json($kind, self)?)
            }

            /// Decode from a stored object of the matching kind.
            pub fn from_object(object: &StoredObject) -> SnapshotResult<Self> {
                Ok(object.decode_json($kind)?)
            }
        }
    };
}

node_codec!(DocumentNode, ObjectKind::Document);
node_codec!(ProjectNode, ObjectKind::Project);
node_codec!(SolutionNode, ObjectKind::Solution);

/// Checksums of the direct children of a stored node.
///
/// Leaves (source text, options, references) have no children. This is what
/// lets the sync walk descend the tree one level at a time without knowing
/// anything else about the snapshot.
pub fn children(checksum: &Checksum, object: &StoredObject) -> SnapshotResult<Vec<Checksum>> {
    let malformed = |e: SnapshotError| SnapshotError::Malformed {
        checksum: *checksum,
        reason: e.to_string(),
    };
    match object.kind {
        ObjectKind::Solution => Ok(SolutionNode::from_object(object)
            .map_err(malformed)?
            .projects),
        ObjectKind::Project => {
            let node = ProjectNode::from_object(object).map_err(malformed)?;
            let mut out = Vec::with_capacity(node.documents.len() + 2);
            out.push(node.options);
            out.push(node.references);
            out.extend(node.documents);
            Ok(out)
        }
        ObjectKind::Document => Ok(vec![DocumentNode::from_object(object)
            .map_err(malformed)?
            .text]),
        ObjectKind::SourceText | ObjectKind::Options | ObjectKind::References => Ok(Vec::new()),
    }
}
