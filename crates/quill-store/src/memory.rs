use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quill_types::{Document, DocumentId, Project, ProjectId};

use crate::error::{StoreError, StoreResult};
use crate::query::{
    DocumentChanges, DocumentFilter, Page, PageRequest, ProjectChanges, ProjectFilter, ProjectSort,
};
use crate::traits::MetadataStore;

/// In-memory, HashMap-based metadata store.
///
/// Intended for tests and embedding. Every trait call takes the lock once,
/// so each conditional update is a single atomic critical section.
pub struct InMemoryMetadataStore {
    inner: RwLock<MetadataState>,
}

#[derive(Default)]
struct MetadataState {
    projects: HashMap<ProjectId, Project>,
    documents: HashMap<DocumentId, Document>,
    /// Unique index over live documents.
    paths: HashMap<(ProjectId, String), DocumentId>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetadataState::default()),
        }
    }

    /// Number of project records, archived included.
    pub fn project_count(&self) -> usize {
        self.read().map(|s| s.projects.len()).unwrap_or(0)
    }

    /// Number of document records, soft-deleted included.
    pub fn document_count(&self) -> usize {
        self.read().map(|s| s.documents.len()).unwrap_or(0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MetadataState>> {
        self.inner.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MetadataState>> {
        self.inner.write().map_err(|_| StoreError::poisoned())
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetadataStore")
            .field("project_count", &self.project_count())
            .field("document_count", &self.document_count())
            .finish()
    }
}

fn sort_projects(projects: &mut [Project], sort: ProjectSort) {
    match sort {
        ProjectSort::UpdatedDesc => {
            projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)))
        }
        // `None < Some(_)`, so descending order puts never-accessed projects last.
        ProjectSort::LastAccessedDesc => projects.sort_by(|a, b| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(b.id.cmp(&a.id))
        }),
        ProjectSort::CreatedDesc => {
            projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
        }
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.projects.contains_key(&project.id) {
            return Err(StoreError::AlreadyExists(format!("project {}", project.id)));
        }
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn find_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.read()?.projects.get(id).cloned())
    }

    async fn find_projects(
        &self,
        filter: &ProjectFilter,
        sort: ProjectSort,
        page: PageRequest,
    ) -> StoreResult<Page<Project>> {
        let mut matches: Vec<Project> = {
            let state = self.read()?;
            state
                .projects
                .values()
                .filter(|p| filter.matches(p))
                .cloned()
                .collect()
        };
        sort_projects(&mut matches, sort);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(Page { items, total })
    }

    async fn update_project(
        &self,
        id: &ProjectId,
        expected_revision: u64,
        changes: ProjectChanges,
    ) -> StoreResult<Project> {
        let mut state = self.write()?;
        let project = state
            .projects
            .get_mut(id)
            .filter(|p| !p.archived)
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))?;
        if project.revision != expected_revision {
            return Err(StoreError::VersionMismatch {
                id: id.to_string(),
                expected: expected_revision,
                actual: project.revision,
            });
        }
        changes.apply(project);
        Ok(project.clone())
    }

    async fn touch_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.write()?;
        let project = state
            .projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))?;
        project.last_accessed_at = Some(at);
        Ok(())
    }

    async fn archive_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.write()?;
        let project = state
            .projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))?;
        if project.archived {
            return Ok(false);
        }
        project.archived = true;
        project.updated_at = at;
        project.revision += 1;
        Ok(true)
    }

    async fn purge_project(&self, id: &ProjectId) -> StoreResult<bool> {
        Ok(self.write()?.projects.remove(id).is_some())
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.documents.contains_key(&document.id) {
            return Err(StoreError::AlreadyExists(format!("document {}", document.id)));
        }
        if !document.deleted {
            let index_key = (document.project_id, document.path.clone());
            if state.paths.contains_key(&index_key) {
                return Err(StoreError::AlreadyExists(format!("path {}", document.path)));
            }
            state.paths.insert(index_key, document.id);
        }
        state.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn find_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn find_document_by_path(
        &self,
        project: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .paths
            .get(&(*project, path.to_string()))
            .and_then(|id| state.documents.get(id))
            .cloned())
    }

    async fn find_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        let state = self.read()?;
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.project_id == filter.project_id)
            .filter(|d| filter.include_deleted || !d.deleted)
            .filter(|d| {
                filter
                    .path_prefix
                    .as_deref()
                    .map_or(true, |prefix| d.path.starts_with(prefix))
            })
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path).then(a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        expected_version: u64,
        changes: DocumentChanges,
    ) -> StoreResult<Document> {
        let mut state = self.write()?;

        let (project_id, old_path) = match state.documents.get(id) {
            Some(d) if !d.deleted => {
                if d.version != expected_version {
                    return Err(StoreError::VersionMismatch {
                        id: id.to_string(),
                        expected: expected_version,
                        actual: d.version,
                    });
                }
                (d.project_id, d.path.clone())
            }
            _ => return Err(StoreError::NotFound(format!("document {id}"))),
        };

        let moved_to = changes.path.clone().filter(|p| *p != old_path);
        if let Some(new_path) = &moved_to {
            if state.paths.contains_key(&(project_id, new_path.clone())) {
                return Err(StoreError::AlreadyExists(format!("path {new_path}")));
            }
        }

        if let Some(new_path) = moved_to {
            state.paths.remove(&(project_id, old_path));
            state.paths.insert((project_id, new_path), *id);
        }

        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        if let Some(name) = changes.name {
            document.name = name;
        }
        if let Some(path) = changes.path {
            document.path = path;
        }
        if let Some((location, size)) = changes.content {
            document.content = location;
            document.size = size;
        }
        document.last_modified_by = changes.modified_by;
        document.last_modified_at = changes.modified_at;
        document.version += 1;
        Ok(document.clone())
    }

    async fn soft_delete_document(&self, id: &DocumentId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.write()?;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        if document.deleted {
            return Ok(false);
        }
        document.deleted = true;
        document.deleted_at = Some(at);
        document.version += 1;
        let index_key = (document.project_id, document.path.clone());
        if state.paths.get(&index_key) == Some(id) {
            state.paths.remove(&index_key);
        }
        Ok(true)
    }

    async fn purge_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        let mut state = self.write()?;
        let removed = state.documents.remove(id);
        if let Some(document) = &removed {
            let index_key = (document.project_id, document.path.clone());
            if state.paths.get(&index_key) == Some(id) {
                state.paths.remove(&index_key);
            }
        }
        Ok(removed)
    }
}
