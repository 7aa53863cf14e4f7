use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tether_store::{ContentStore, ObjectKind, StoredObject};
use tether_types::{Checksum, DocumentId, ProjectId, SnapshotVersion};

use crate::error::{SnapshotError, SnapshotResult};
use crate::node::{DocumentNode, OptionSet, ProjectNode, ReferenceList, SolutionNode};

// ---------------------------------------------------------------------------
// DocumentSnapshot
// ---------------------------------------------------------------------------

/// One immutable document: attributes, text and the two stored nodes
/// (document node and source text) backing them.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    id: DocumentId,
    name: String,
    text: Arc<str>,
    checksum: Checksum,
    node: StoredObject,
    text_checksum: Checksum,
    text_node: StoredObject,
}

impl DocumentSnapshot {
    /// Build a document, hashing its text and node.
    pub fn build(
        id: DocumentId,
        name: impl Into<String>,
        text: impl Into<Arc<str>>,
    ) -> SnapshotResult<Self> {
        let name = name.into();
        let text: Arc<str> = text.into();
        let text_node = StoredObject::new(ObjectKind::SourceText, text.as_bytes().to_vec());
        let text_checksum = text_node.compute_checksum();
        let node = DocumentNode {
            id,
            name: name.clone(),
            text: text_checksum,
        }
        .to_object()?;
        Ok(Self {
            id,
            name,
            text,
            checksum: node.compute_checksum(),
            node,
            text_checksum,
            text_node,
        })
    }

    fn load(
        checksum: Checksum,
        resolve: &mut impl FnMut(&Checksum) -> SnapshotResult<Option<StoredObject>>,
    ) -> SnapshotResult<Self> {
        let node_obj = require(resolve, &checksum)?;
        let node = DocumentNode::from_object(&node_obj).map_err(|e| malformed(checksum, e))?;
        let text_node = require(resolve, &node.text)?;
        text_node
            .expect_kind(ObjectKind::SourceText)
            .map_err(|e| malformed(node.text, e.into()))?;
        let text = std::str::from_utf8(&text_node.data).map_err(|e| SnapshotError::Malformed {
            checksum: node.text,
            reason: e.to_string(),
        })?;
        Ok(Self {
            id: node.id,
            name: node.name,
            text: Arc::from(text),
            checksum,
            node: node_obj,
            text_checksum: node.text,
            text_node,
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &Arc<str> {
        &self.text
    }

    /// Checksum of the document node.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Checksum of the source text alone.
    pub fn text_checksum(&self) -> Checksum {
        self.text_checksum
    }

    fn push_nodes(&self, out: &mut Vec<(Checksum, StoredObject)>) {
        out.push((self.checksum, self.node.clone()));
        out.push((self.text_checksum, self.text_node.clone()));
    }
}

// ---------------------------------------------------------------------------
// ProjectSnapshot
// ---------------------------------------------------------------------------

/// One immutable project with its options, references and documents.
#[derive(Clone, Debug)]
pub struct ProjectSnapshot {
    id: ProjectId,
    name: String,
    language: String,
    options: OptionSet,
    references: ReferenceList,
    documents: BTreeMap<DocumentId, Arc<DocumentSnapshot>>,
    checksum: Checksum,
    node: StoredObject,
    options_checksum: Checksum,
    options_node: StoredObject,
    references_checksum: Checksum,
    references_node: StoredObject,
}

impl ProjectSnapshot {
    /// Build a project from already-built documents.
    pub fn build(
        id: ProjectId,
        name: impl Into<String>,
        language: impl Into<String>,
        options: OptionSet,
        references: ReferenceList,
        documents: BTreeMap<DocumentId, Arc<DocumentSnapshot>>,
    ) -> SnapshotResult<Self> {
        let name = name.into();
        let language = language.into();
        let options_node = options.to_object()?;
        let options_checksum = options_node.compute_checksum();
        let references_node = references.to_object()?;
        let references_checksum = references_node.compute_checksum();
        let node = ProjectNode {
            id,
            name: name.clone(),
            language: language.clone(),
            options: options_checksum,
            references: references_checksum,
            documents: documents.values().map(|d| d.checksum).collect(),
        }
        .to_object()?;
        Ok(Self {
            id,
            name,
            language,
            options,
            references,
            documents,
            checksum: node.compute_checksum(),
            node,
            options_checksum,
            options_node,
            references_checksum,
            references_node,
        })
    }

    fn load(
        checksum: Checksum,
        resolve: &mut impl FnMut(&Checksum) -> SnapshotResult<Option<StoredObject>>,
    ) -> SnapshotResult<Self> {
        let node_obj = require(resolve, &checksum)?;
        let node = ProjectNode::from_object(&node_obj).map_err(|e| malformed(checksum, e))?;

        let options_node = require(resolve, &node.options)?;
        let options: OptionSet = options_node
            .decode_json(ObjectKind::Options)
            .map_err(|e| malformed(node.options, e.into()))?;
        let references_node = require(resolve, &node.references)?;
        let references: ReferenceList = references_node
            .decode_json(ObjectKind::References)
            .map_err(|e| malformed(node.references, e.into()))?;

        let mut documents = BTreeMap::new();
        for doc_checksum in &node.documents {
            let doc = DocumentSnapshot::load(*doc_checksum, resolve)?;
            documents.insert(doc.id, Arc::new(doc));
        }

        Ok(Self {
            id: node.id,
            name: node.name,
            language: node.language,
            options,
            references,
            documents,
            checksum,
            node: node_obj,
            options_checksum: node.options,
            options_node,
            references_checksum: node.references,
            references_node,
        })
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn references(&self) -> &ReferenceList {
        &self.references
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentSnapshot>> {
        self.documents.get(&id)
    }

    /// Documents in `DocumentId` order.
    pub fn documents(&self) -> impl Iterator<Item = &Arc<DocumentSnapshot>> {
        self.documents.values()
    }

    pub(crate) fn document_map(&self) -> &BTreeMap<DocumentId, Arc<DocumentSnapshot>> {
        &self.documents
    }

    fn push_nodes(&self, out: &mut Vec<(Checksum, StoredObject)>) {
        out.push((self.checksum, self.node.clone()));
        out.push((self.options_checksum, self.options_node.clone()));
        out.push((self.references_checksum, self.references_node.clone()));
        for doc in self.documents.values() {
            doc.push_nodes(out);
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable, versioned view of a whole solution.
///
/// Identity is the solution checksum alone; two snapshots with the same
/// checksum are interchangeable whatever their version. Parts are shared
/// through `Arc`, so deriving a snapshot from a previous one only allocates
/// the changed path.
#[derive(Clone, Debug)]
pub struct Snapshot {
    checksum: Checksum,
    version: SnapshotVersion,
    projects: BTreeMap<ProjectId, Arc<ProjectSnapshot>>,
    node: StoredObject,
}

impl Snapshot {
    /// Build a snapshot from already-built projects.
    pub fn build(
        version: SnapshotVersion,
        projects: BTreeMap<ProjectId, Arc<ProjectSnapshot>>,
    ) -> SnapshotResult<Self> {
        let node = SolutionNode {
            projects: projects.values().map(|p| p.checksum).collect(),
        }
        .to_object()?;
        Ok(Self {
            checksum: node.compute_checksum(),
            version,
            projects,
            node,
        })
    }

    /// An empty solution.
    pub fn empty() -> SnapshotResult<Self> {
        Self::build(SnapshotVersion::INITIAL, BTreeMap::new())
    }

    /// Reassemble a snapshot from its root checksum.
    ///
    /// `resolve` returns the stored node for a checksum, or `None` when it is
    /// unavailable. A missing or undecodable node fails the whole assembly;
    /// a partially built snapshot is never returned.
    pub fn assemble(
        root: Checksum,
        version: SnapshotVersion,
        mut resolve: impl FnMut(&Checksum) -> SnapshotResult<Option<StoredObject>>,
    ) -> SnapshotResult<Self> {
        let node_obj = require(&mut resolve, &root)?;
        let node = SolutionNode::from_object(&node_obj).map_err(|e| malformed(root, e))?;
        let mut projects = BTreeMap::new();
        for project_checksum in &node.projects {
            let project = ProjectSnapshot::load(*project_checksum, &mut resolve)?;
            projects.insert(project.id, Arc::new(project));
        }
        Ok(Self {
            checksum: root,
            version,
            projects,
            node: node_obj,
        })
    }

    /// Reassemble a snapshot entirely from a content store.
    pub fn load(
        root: Checksum,
        version: SnapshotVersion,
        store: &dyn ContentStore,
    ) -> SnapshotResult<Self> {
        Self::assemble(root, version, |c| Ok(store.get(c)?))
    }

    /// Root (solution) checksum.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Same content under a different version number.
    pub fn with_version(&self, version: SnapshotVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    pub fn project(&self, id: ProjectId) -> Option<&Arc<ProjectSnapshot>> {
        self.projects.get(&id)
    }

    /// Projects in `ProjectId` order.
    pub fn projects(&self) -> impl Iterator<Item = &Arc<ProjectSnapshot>> {
        self.projects.values()
    }

    pub(crate) fn project_map(&self) -> &BTreeMap<ProjectId, Arc<ProjectSnapshot>> {
        &self.projects
    }

    /// Find a document in any project.
    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentSnapshot>> {
        self.projects.values().find_map(|p| p.document(id))
    }

    /// Every document of every project.
    pub fn documents(&self) -> impl Iterator<Item = &Arc<DocumentSnapshot>> {
        self.projects.values().flat_map(|p| p.documents())
    }

    /// Every stored node of the tree, de-duplicated, root first.
    pub fn nodes(&self) -> Vec<(Checksum, StoredObject)> {
        let mut all = vec![(self.checksum, self.node.clone())];
        for project in self.projects.values() {
            project.push_nodes(&mut all);
        }
        let mut seen = BTreeSet::new();
        all.retain(|(c, _)| seen.insert(*c));
        all
    }

    /// Every checksum in the tree, de-duplicated.
    pub fn all_checksums(&self) -> Vec<Checksum> {
        self.nodes().into_iter().map(|(c, _)| c).collect()
    }

    /// Write every node not already present into `store`.
    ///
    /// Returns the number of nodes written.
    pub fn publish(&self, store: &dyn ContentStore) -> SnapshotResult<usize> {
        let mut written = 0;
        for (checksum, object) in self.nodes() {
            if !store.contains(&checksum)? {
                store.put(object)?;
                written += 1;
            }
        }
        Ok(written)
    }
}

fn require(
    resolve: &mut impl FnMut(&Checksum) -> SnapshotResult<Option<StoredObject>>,
    checksum: &Checksum,
) -> SnapshotResult<StoredObject> {
    resolve(checksum)?.ok_or(SnapshotError::MissingNode(*checksum))
}

fn malformed(checksum: Checksum, err: SnapshotError) -> SnapshotError {
    SnapshotError::Malformed {
        checksum,
        reason: err.to_string(),
    }
}
