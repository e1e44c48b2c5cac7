//! Failure-injecting store wrappers and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quill_store::{
    BlobMeta, BlobStore, ByteReader, DocumentChanges, DocumentFilter, InMemoryBlobStore,
    InMemoryMetadataStore, MetadataStore, Page, PageRequest, PresignedUrl, ProjectChanges,
    ProjectFilter, ProjectSort, StoreError, StoreResult,
};
use quill_types::{BlobKey, Document, DocumentId, Project, ProjectId};

use crate::config::CoreConfig;
use crate::document::DocumentManager;
use crate::project::ProjectManager;

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

/// Metadata store wrapper with switchable failures.
#[derive(Default)]
pub struct FlakyMetadata {
    pub inner: InMemoryMetadataStore,
    pub fail_touch: AtomicBool,
    pub fail_insert_document: AtomicBool,
    pub fail_update_document: AtomicBool,
    /// Commit the write, then hang before answering.
    pub stall_after_insert: AtomicBool,
    pub stall_after_update: AtomicBool,
    /// Report the record as already gone after purging it.
    pub lose_purge_race: AtomicBool,
    pub stall_reads: AtomicBool,
    pub touches: AtomicUsize,
}

impl FlakyMetadata {
    async fn maybe_stall(&self) {
        stall_if(&self.stall_reads).await;
    }
}

async fn stall_if(switch: &AtomicBool) {
    if switch.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.inner.insert_project(project).await
    }

    async fn find_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        self.maybe_stall().await;
        self.inner.find_project(id).await
    }

    async fn find_projects(
        &self,
        filter: &ProjectFilter,
        sort: ProjectSort,
        page: PageRequest,
    ) -> StoreResult<Page<Project>> {
        self.inner.find_projects(filter, sort, page).await
    }

    async fn update_project(
        &self,
        id: &ProjectId,
        expected_revision: u64,
        changes: ProjectChanges,
    ) -> StoreResult<Project> {
        self.inner.update_project(id, expected_revision, changes).await
    }

    async fn touch_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<()> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        if self.fail_touch.load(Ordering::SeqCst) {
            return Err(unavailable("touch"));
        }
        self.inner.touch_project(id, at).await
    }

    async fn archive_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.archive_project(id, at).await
    }

    async fn purge_project(&self, id: &ProjectId) -> StoreResult<bool> {
        self.inner.purge_project(id).await
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        if self.fail_insert_document.load(Ordering::SeqCst) {
            return Err(unavailable("insert"));
        }
        self.inner.insert_document(document).await?;
        stall_if(&self.stall_after_insert).await;
        Ok(())
    }

    async fn find_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        self.inner.find_document(id).await
    }

    async fn find_document_by_path(
        &self,
        project: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<Document>> {
        self.inner.find_document_by_path(project, path).await
    }

    async fn find_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        self.inner.find_documents(filter).await
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        expected_version: u64,
        changes: DocumentChanges,
    ) -> StoreResult<Document> {
        if self.fail_update_document.load(Ordering::SeqCst) {
            return Err(unavailable("update"));
        }
        let updated = self.inner.update_document(id, expected_version, changes).await?;
        stall_if(&self.stall_after_update).await;
        Ok(updated)
    }

    async fn soft_delete_document(&self, id: &DocumentId, at: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.soft_delete_document(id, at).await
    }

    async fn purge_document(&self, id: &DocumentId) -> StoreResult<Option<Document>> {
        let removed = self.inner.purge_document(id).await?;
        if self.lose_purge_race.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(removed)
    }
}

/// Blob store wrapper with switchable failures.
pub struct FlakyBlobs {
    pub inner: InMemoryBlobStore,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub stall_put: AtomicBool,
}

impl Default for FlakyBlobs {
    fn default() -> Self {
        Self {
            inner: InMemoryBlobStore::new("test"),
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            stall_put: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyBlobs {
    async fn put(
        &self,
        key: &BlobKey,
        body: ByteReader,
        size: u64,
        content_type: &str,
    ) -> StoreResult<BlobMeta> {
        stall_if(&self.stall_put).await;
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(unavailable("put"));
        }
        self.inner.put(key, body, size, content_type).await
    }

    async fn get(&self, key: &BlobKey) -> StoreResult<ByteReader> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(unavailable("get"));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> StoreResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(unavailable("delete"));
        }
        self.inner.delete(key).await
    }

    async fn stat(&self, key: &BlobKey) -> StoreResult<Option<BlobMeta>> {
        self.inner.stat(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobMeta>> {
        self.inner.list(prefix).await
    }

    async fn presigned_get(&self, key: &BlobKey, ttl: Duration) -> StoreResult<Option<PresignedUrl>> {
        self.inner.presigned_get(key, ttl).await
    }
}

/// Managers wired over flaky stores, plus handles to those stores.
pub struct Harness {
    pub metadata: Arc<FlakyMetadata>,
    pub blobs: Arc<FlakyBlobs>,
    pub projects: Arc<ProjectManager>,
    pub documents: DocumentManager,
}

impl Harness {
    pub fn new(config: CoreConfig) -> Self {
        let config = Arc::new(config);
        let metadata = Arc::new(FlakyMetadata::default());
        let blobs = Arc::new(FlakyBlobs::default());
        let projects = Arc::new(ProjectManager::new(metadata.clone(), config.clone()));
        let documents = DocumentManager::new(projects.clone(), metadata.clone(), blobs.clone(), config);
        Self {
            metadata,
            blobs,
            projects,
            documents,
        }
    }

    /// Harness with a tiny inline threshold so externalization is easy to hit.
    pub fn with_threshold(threshold: u64) -> Self {
        Self::new(CoreConfig::with_threshold(threshold))
    }
}
