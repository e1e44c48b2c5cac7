use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use quill_types::{BlobKey, Document, DocumentId, Project, ProjectId};

use crate::blob::{read_all, reader_from_bytes, BlobMeta, ByteReader, PresignedUrl};
use crate::error::StoreResult;
use crate::query::{
    DocumentChanges, DocumentFilter, Page, PageRequest, ProjectChanges, ProjectFilter, ProjectSort,
};

/// Structured record store for projects and documents.
///
/// All implementations must satisfy these invariants:
/// - `update_*` is a compare-and-set: it applies every change if and only if
///   the stored version token equals `expected`, and reports
///   [`StoreError::VersionMismatch`](crate::StoreError::VersionMismatch)
///   otherwise without touching the record.
/// - `(project_id, path)` is unique among live (non-deleted) documents;
///   violations are reported as
///   [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists).
/// - Updates to soft-deleted documents or archived projects report
///   [`StoreError::NotFound`](crate::StoreError::NotFound).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ---- Projects ----

    async fn insert_project(&self, project: &Project) -> StoreResult<()>;

    /// Read a project by id, archived or not.
    async fn find_project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    async fn find_projects(
        &self,
        filter: &ProjectFilter,
        sort: ProjectSort,
        page: PageRequest,
    ) -> StoreResult<Page<Project>>;

    /// Apply `changes` if the stored revision equals `expected_revision`.
    async fn update_project(
        &self,
        id: &ProjectId,
        expected_revision: u64,
        changes: ProjectChanges,
    ) -> StoreResult<Project>;

    /// Set `last_accessed_at` without bumping the revision.
    async fn touch_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Soft delete: set the archived flag. Returns `false` if already archived.
    async fn archive_project(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Physically remove a project record. Returns `true` if it existed.
    async fn purge_project(&self, id: &ProjectId) -> StoreResult<bool>;

    // ---- Documents ----

    async fn insert_document(&self, document: &Document) -> StoreResult<()>;

    /// Read a document by id, deleted or not.
    async fn find_document(&self, id: &DocumentId) -> StoreResult<Option<Document>>;

    /// Look up the live document at `path` in a project.
    async fn find_document_by_path(
        &self,
        project: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<Document>>;

    async fn find_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>>;

    /// Apply `changes` if the stored version equals `expected_version`.
    async fn update_document(
        &self,
        id: &DocumentId,
        expected_version: u64,
        changes: DocumentChanges,
    ) -> StoreResult<Document>;

    /// Soft delete. Returns `false` (and changes nothing) if already deleted.
    async fn soft_delete_document(&self, id: &DocumentId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Physically remove a document record, returning it if it existed.
    async fn purge_document(&self, id: &DocumentId) -> StoreResult<Option<Document>>;
}

/// Byte object store addressed by [`BlobKey`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store exactly `size` bytes from `body` under `key`, replacing any
    /// existing object.
    ///
    /// A stream that yields a different number of bytes is rejected with
    /// [`StoreError::SizeMismatch`](crate::StoreError::SizeMismatch) and
    /// nothing is stored.
    async fn put(
        &self,
        key: &BlobKey,
        body: ByteReader,
        size: u64,
        content_type: &str,
    ) -> StoreResult<BlobMeta>;

    /// Open an object for reading. Missing objects are
    /// [`StoreError::NotFound`](crate::StoreError::NotFound).
    async fn get(&self, key: &BlobKey) -> StoreResult<ByteReader>;

    /// Remove an object. Returns `true` if it existed.
    async fn delete(&self, key: &BlobKey) -> StoreResult<bool>;

    async fn stat(&self, key: &BlobKey) -> StoreResult<Option<BlobMeta>>;

    /// All objects whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobMeta>>;

    /// Pre-authorized expiring download link.
    ///
    /// Backends without link support return `Ok(None)`.
    async fn presigned_get(&self, _key: &BlobKey, _ttl: Duration) -> StoreResult<Option<PresignedUrl>> {
        Ok(None)
    }

    async fn exists(&self, key: &BlobKey) -> StoreResult<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    async fn put_bytes(&self, key: &BlobKey, bytes: Bytes, content_type: &str) -> StoreResult<BlobMeta> {
        let size = bytes.len() as u64;
        self.put(key, reader_from_bytes(bytes), size, content_type).await
    }

    async fn get_bytes(&self, key: &BlobKey) -> StoreResult<Bytes> {
        let reader = self.get(key).await?;
        read_all(reader).await
    }
}
