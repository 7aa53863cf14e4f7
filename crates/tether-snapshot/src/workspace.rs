use std::collections::BTreeMap;
use std::sync::Arc;

use tether_store::ContentStore;
use tether_types::{DocumentId, ProjectId};
use tracing::debug;

use crate::error::{SnapshotError, SnapshotResult};
use crate::node::{OptionSet, ReferenceList};
use crate::snapshot::{DocumentSnapshot, ProjectSnapshot, Snapshot};

/// Attributes of a project being added to a workspace.
#[derive(Clone, Debug)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
    pub language: String,
    pub options: OptionSet,
    pub references: ReferenceList,
}

impl ProjectInfo {
    /// A project with a fresh id, no options and no references.
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            language: language.into(),
            options: OptionSet::new(),
            references: ReferenceList::default(),
        }
    }

    pub fn with_id(mut self, id: ProjectId) -> Self {
        self.id = id;
        self
    }

    pub fn with_options(mut self, options: OptionSet) -> Self {
        self.options = options;
        self
    }
}

/// The host's mutable workspace.
///
/// Every mutation derives a new immutable [`Snapshot`] with the next
/// version, writes its new nodes into the authoritative store and retains
/// them there. The previous snapshot's retain is released afterwards, so the
/// current snapshot can always be served in full.
pub struct Workspace {
    store: Arc<dyn ContentStore>,
    current: Arc<Snapshot>,
}

impl Workspace {
    /// An empty workspace publishing into `store`.
    pub fn new(store: Arc<dyn ContentStore>) -> SnapshotResult<Self> {
        let current = Arc::new(Snapshot::empty()?);
        store.retain(&current.all_checksums());
        current.publish(store.as_ref())?;
        Ok(Self { store, current })
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }

    /// The authoritative store.
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn add_project(&mut self, info: ProjectInfo) -> SnapshotResult<ProjectId> {
        if self.current.project(info.id).is_some() {
            return Err(SnapshotError::DuplicateProject(info.id));
        }
        let project = ProjectSnapshot::build(
            info.id,
            info.name,
            info.language,
            info.options,
            info.references,
            BTreeMap::new(),
        )?;
        let mut projects = self.current.project_map().clone();
        projects.insert(info.id, Arc::new(project));
        self.commit(projects)?;
        Ok(info.id)
    }

    pub fn remove_project(&mut self, id: ProjectId) -> SnapshotResult<()> {
        let mut projects = self.current.project_map().clone();
        if projects.remove(&id).is_none() {
            return Err(SnapshotError::UnknownProject(id));
        }
        self.commit(projects)
    }

    /// Add a document with a fresh id.
    pub fn add_document(
        &mut self,
        project: ProjectId,
        name: impl Into<String>,
        text: impl Into<Arc<str>>,
    ) -> SnapshotResult<DocumentId> {
        self.add_document_with_id(project, DocumentId::new(), name, text)
    }

    /// Add a document under a caller-chosen id, e.g. one derived from its
    /// path so reloading the same tree yields the same checksum.
    pub fn add_document_with_id(
        &mut self,
        project: ProjectId,
        id: DocumentId,
        name: impl Into<String>,
        text: impl Into<Arc<str>>,
    ) -> SnapshotResult<DocumentId> {
        if self.current.document(id).is_some() {
            return Err(SnapshotError::DuplicateDocument(id));
        }
        let doc = DocumentSnapshot::build(id, name, text)?;
        self.edit_documents(project, |docs| {
            docs.insert(id, Arc::new(doc));
            Ok(())
        })?;
        Ok(id)
    }

    /// Replace a document's text.
    pub fn update_text(
        &mut self,
        document: DocumentId,
        text: impl Into<Arc<str>>,
    ) -> SnapshotResult<()> {
        let project = self.owner_of(document)?;
        let text = text.into();
        self.edit_documents(project, |docs| {
            let old = docs
                .get(&document)
                .ok_or(SnapshotError::UnknownDocument(document))?;
            let doc = DocumentSnapshot::build(document, old.name(), text)?;
            docs.insert(document, Arc::new(doc));
            Ok(())
        })
    }

    pub fn remove_document(&mut self, document: DocumentId) -> SnapshotResult<()> {
        let project = self.owner_of(document)?;
        self.edit_documents(project, |docs| {
            docs.remove(&document)
                .map(|_| ())
                .ok_or(SnapshotError::UnknownDocument(document))
        })
    }

    pub fn set_options(&mut self, project: ProjectId, options: OptionSet) -> SnapshotResult<()> {
        self.edit_project(project, |p| {
            ProjectSnapshot::build(
                p.id(),
                p.name(),
                p.language(),
                options,
                p.references().clone(),
                p.document_map().clone(),
            )
        })
    }

    /// Make `from` reference `to`. Both must exist.
    pub fn add_project_reference(&mut self, from: ProjectId, to: ProjectId) -> SnapshotResult<()> {
        if self.current.project(to).is_none() {
            return Err(SnapshotError::UnknownProject(to));
        }
        self.edit_project(from, |p| {
            let mut projects = p.references().projects.clone();
            projects.push(to);
            let references = ReferenceList::new(projects, p.references().metadata.clone());
            ProjectSnapshot::build(
                p.id(),
                p.name(),
                p.language(),
                p.options().clone(),
                references,
                p.document_map().clone(),
            )
        })
    }

    /// Add an external metadata reference to a project.
    pub fn add_metadata_reference(
        &mut self,
        project: ProjectId,
        name: impl Into<String>,
    ) -> SnapshotResult<()> {
        let name = name.into();
        self.edit_project(project, |p| {
            let mut metadata = p.references().metadata.clone();
            metadata.push(name);
            let references = ReferenceList::new(p.references().projects.clone(), metadata);
            ProjectSnapshot::build(
                p.id(),
                p.name(),
                p.language(),
                p.options().clone(),
                references,
                p.document_map().clone(),
            )
        })
    }

    fn owner_of(&self, document: DocumentId) -> SnapshotResult<ProjectId> {
        self.current
            .projects()
            .find(|p| p.document(document).is_some())
            .map(|p| p.id())
            .ok_or(SnapshotError::UnknownDocument(document))
    }

    fn edit_documents(
        &mut self,
        project: ProjectId,
        edit: impl FnOnce(&mut BTreeMap<DocumentId, Arc<DocumentSnapshot>>) -> SnapshotResult<()>,
    ) -> SnapshotResult<()> {
        self.edit_project(project, |p| {
            let mut docs = p.document_map().clone();
            edit(&mut docs)?;
            ProjectSnapshot::build(
                p.id(),
                p.name(),
                p.language(),
                p.options().clone(),
                p.references().clone(),
                docs,
            )
        })
    }

    fn edit_project(
        &mut self,
        id: ProjectId,
        edit: impl FnOnce(&ProjectSnapshot) -> SnapshotResult<ProjectSnapshot>,
    ) -> SnapshotResult<()> {
        let existing = self
            .current
            .project(id)
            .ok_or(SnapshotError::UnknownProject(id))?;
        let rebuilt = edit(existing)?;
        let mut projects = self.current.project_map().clone();
        projects.insert(id, Arc::new(rebuilt));
        self.commit(projects)
    }

    fn commit(&mut self, projects: BTreeMap<ProjectId, Arc<ProjectSnapshot>>) -> SnapshotResult<()> {
        let next = Snapshot::build(self.current.version().next(), projects)?;
        // Retain first: publishing may evict under a tight budget.
        self.store.retain(&next.all_checksums());
        let written = match next.publish(self.store.as_ref()) {
            Ok(written) => written,
            Err(e) => {
                self.store.release(&next.all_checksums());
                return Err(e);
            }
        };
        self.store.release(&self.current.all_checksums());
        debug!(
            checksum = %next.checksum(),
            version = %next.version(),
            written,
            "published snapshot"
        );
        self.current = Arc::new(next);
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.store.release(&self.current.all_checksums());
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("checksum", &self.current.checksum())
            .field("version", &self.current.version())
            .finish()
    }
}
