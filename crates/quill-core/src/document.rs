//! Document lifecycle over the two stores.
//!
//! Content is placed inline in the metadata record or externalized to the
//! blob store according to [`PlacementPolicy`]. Writes that touch both
//! stores are ordered so a failure leaves at worst an unreferenced blob:
//!
//! - create, upload and upgrade write the blob first, then the record, and
//!   delete the blob again if the record write was rejected. When the write
//!   timed out or hit an unavailable store its outcome is unknown, so the
//!   record is read back and the blob is kept if it is referenced or if the
//!   read fails too;
//! - delete, downgrade and replacement commit the record first, then delete
//!   the old blob on a best-effort basis.
//!
//! Every content write uses a fresh [`BlobKey`], so a committed record never
//! points at an object a failed write could have clobbered.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quill_store::blob::{read_exact_size, reader_from_bytes};
use quill_store::{
    BlobStore, ByteReader, DocumentChanges, DocumentFilter, MetadataStore, PresignedUrl,
    StoreError,
};
use quill_tree::{build_document_tree, TreeNode};
use quill_types::{
    validate, Access, BlobKey, ContentLocation, Document, DocumentId, FileType, ProjectId, UserId,
};

use crate::config::CoreConfig;
use crate::deadline::bounded;
use crate::error::{CoreError, CoreResult};
use crate::placement::{Placement, PlacementPolicy};
use crate::project::ProjectManager;

/// Input for [`DocumentManager::create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDocument {
    pub name: String,
    pub path: String,
    pub file_type: FileType,
    pub content: Bytes,
}

impl NewDocument {
    /// Derive name and type from the last path segment.
    pub fn from_path(path: impl Into<String>, content: Bytes) -> CoreResult<Self> {
        let path = path.into();
        let (name, file_type) = name_and_type(&path)?;
        Ok(Self {
            name,
            path,
            file_type,
            content,
        })
    }
}

/// Input for [`DocumentManager::upload_binary`]. The bytes arrive separately
/// as a stream that must hold exactly `size` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    pub name: String,
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
}

impl UploadRequest {
    pub fn from_path(path: impl Into<String>, size: u64) -> CoreResult<Self> {
        let path = path.into();
        let (name, file_type) = name_and_type(&path)?;
        Ok(Self {
            name,
            path,
            file_type,
            size,
        })
    }
}

fn name_and_type(path: &str) -> CoreResult<(String, FileType)> {
    let name = path
        .rsplit(validate::PATH_SEPARATOR)
        .next()
        .unwrap_or(path)
        .to_string();
    let file_type = FileType::from_path(path)?;
    Ok((name, file_type))
}

/// Fields changed by [`DocumentManager::update`].
///
/// `expected_version` is the version the caller last read; the update is
/// rejected with `Conflict` if the stored version has moved on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentUpdate {
    pub expected_version: u64,
    pub name: Option<String>,
    pub path: Option<String>,
    pub content: Option<Bytes>,
}

impl DocumentUpdate {
    pub fn content(expected_version: u64, content: Bytes) -> Self {
        Self {
            expected_version,
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn move_to(expected_version: u64, path: impl Into<String>) -> Self {
        Self {
            expected_version,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.path.is_none() && self.content.is_none()
    }
}

/// A document record with its bytes resolved.
///
/// `content` is materialized for this response only and never written back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub document: Document,
    pub content: Bytes,
}

/// A document record with a stream over its bytes.
pub struct Download {
    pub document: Document,
    pub reader: ByteReader,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("document", &self.document.id)
            .field("size", &self.document.size)
            .finish_non_exhaustive()
    }
}

/// Totals from removing every document of a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub documents_removed: usize,
    pub blobs_released: usize,
}

pub struct DocumentManager {
    projects: Arc<ProjectManager>,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<CoreConfig>,
    placement: PlacementPolicy,
}

impl DocumentManager {
    pub fn new(
        projects: Arc<ProjectManager>,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: Arc<CoreConfig>,
    ) -> Self {
        let placement = PlacementPolicy::new(config.inline_threshold);
        Self {
            projects,
            metadata,
            blobs,
            config,
            placement,
        }
    }

    pub fn placement(&self) -> PlacementPolicy {
        self.placement
    }

    pub async fn create(
        &self,
        project_id: &ProjectId,
        caller: &UserId,
        new: NewDocument,
    ) -> CoreResult<Document> {
        let name = validate::document_name(&new.name)?;
        validate::document_path(&new.path)?;
        ensure_type_matches(&new.path, new.file_type)?;

        self.projects.authorize(project_id, caller, Access::Write).await?;
        self.ensure_path_free(project_id, &new.path).await?;

        let id = DocumentId::new();
        let size = new.content.len() as u64;
        let placement = self.placement.decide(new.file_type, size);
        debug!(document = %id, size, %placement, "placing new document");
        let content = match placement {
            Placement::Inline => ContentLocation::Inline(new.content),
            Placement::External => {
                let key = BlobKey::generate(project_id, &id);
                self.put_blob(&key, new.content, new.file_type).await?;
                ContentLocation::External(key)
            }
        };

        let now = Utc::now();
        let document = Document {
            id,
            project_id: *project_id,
            name,
            path: new.path,
            file_type: new.file_type,
            content,
            size,
            created_by: caller.clone(),
            created_at: now,
            last_modified_by: caller.clone(),
            last_modified_at: now,
            version: 1,
            deleted: false,
            deleted_at: None,
        };
        self.insert_or_release(&document).await?;
        info!(project = %project_id, document = %id, path = %document.path, "document created");
        Ok(document)
    }

    /// Read a document with its bytes resolved from wherever they live.
    pub async fn get(&self, id: &DocumentId, caller: &UserId) -> CoreResult<DocumentContent> {
        let document = self.load_live(id).await?;
        self.projects
            .authorize(&document.project_id, caller, Access::Read)
            .await?;
        let content = match &document.content {
            ContentLocation::Inline(bytes) => bytes.clone(),
            ContentLocation::External(key) => {
                bounded(
                    self.config.store_timeout,
                    "blob read",
                    dangling_as_backend(self.blobs.get_bytes(key), key),
                )
                .await?
            }
        };
        Ok(DocumentContent { document, content })
    }

    /// Live documents of a project, ordered by path.
    pub async fn list(&self, project_id: &ProjectId, caller: &UserId) -> CoreResult<Vec<Document>> {
        self.projects.authorize(project_id, caller, Access::Read).await?;
        bounded(
            self.config.store_timeout,
            "document listing",
            self.metadata.find_documents(&DocumentFilter::project(*project_id)),
        )
        .await
    }

    /// Conditionally apply `update`.
    ///
    /// New content is placed by its own size, migrating between inline and
    /// external storage as needed. The file type is fixed at creation, so a
    /// new path must keep an extension of the same type.
    pub async fn update(
        &self,
        id: &DocumentId,
        caller: &UserId,
        update: DocumentUpdate,
    ) -> CoreResult<Document> {
        if update.is_empty() {
            return Err(CoreError::validation("document update names no fields"));
        }
        let name = update.name.as_deref().map(validate::document_name).transpose()?;
        if let Some(path) = &update.path {
            validate::document_path(path)?;
        }

        let current = self.load_live(id).await?;
        self.projects
            .authorize(&current.project_id, caller, Access::Write)
            .await?;
        if current.version != update.expected_version {
            return Err(CoreError::Conflict(format!(
                "document {id} is at version {}, update expected {}",
                current.version, update.expected_version
            )));
        }
        if let Some(path) = update.path.as_deref().filter(|p| *p != current.path) {
            ensure_type_matches(path, current.file_type)?;
            self.ensure_path_free(&current.project_id, path).await?;
        }

        let mut changes = DocumentChanges::by(caller.clone(), Utc::now());
        changes.name = name;
        changes.path = update.path;
        let mut written = None;
        if let Some(bytes) = update.content {
            let size = bytes.len() as u64;
            let placement = self.placement.decide(current.file_type, size);
            debug!(
                document = %id,
                size,
                from = %placement_of(&current),
                to = %placement,
                "placing updated content"
            );
            let location = match placement {
                Placement::Inline => ContentLocation::Inline(bytes),
                Placement::External => {
                    let key = BlobKey::generate(&current.project_id, id);
                    self.put_blob(&key, bytes, current.file_type).await?;
                    written = Some(key.clone());
                    ContentLocation::External(key)
                }
            };
            changes.content = Some((location, size));
        }
        let content_changed = changes.content.is_some();

        let result = bounded(
            self.config.store_timeout,
            "document update",
            self.metadata
                .update_document(id, update.expected_version, changes),
        )
        .await;
        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                if let Some(key) = written {
                    self.release_unless_committed(id, &key, &e, "update was not committed")
                        .await;
                }
                return Err(e);
            }
        };

        if content_changed {
            if let Some(old) = current.blob_key() {
                self.discard_blob(old, "content replaced").await;
            }
        }
        debug!(document = %id, version = updated.version, "document updated");
        Ok(updated)
    }

    /// Soft delete. Deleting an already-deleted document succeeds and
    /// changes nothing.
    pub async fn delete(&self, id: &DocumentId, caller: &UserId) -> CoreResult<()> {
        let document = self.load_any(id).await?;
        self.projects
            .authorize(&document.project_id, caller, Access::Write)
            .await?;
        if document.deleted {
            return Ok(());
        }
        let deleted = bounded(
            self.config.store_timeout,
            "document delete",
            self.metadata.soft_delete_document(id, Utc::now()),
        )
        .await?;
        if deleted {
            if let Some(key) = document.blob_key() {
                self.discard_blob(key, "document deleted").await;
            }
            info!(project = %document.project_id, document = %id, "document deleted");
        }
        Ok(())
    }

    /// Physically remove a live or soft-deleted document and free its blob.
    pub async fn hard_delete(&self, id: &DocumentId, caller: &UserId) -> CoreResult<()> {
        let document = self.load_any(id).await?;
        self.projects
            .authorize(&document.project_id, caller, Access::Write)
            .await?;
        let removed = bounded(
            self.config.store_timeout,
            "document purge",
            self.metadata.purge_document(id),
        )
        .await?;
        let Some(removed) = removed else {
            debug!(document = %id, "document already purged");
            return Ok(());
        };
        if let Some(key) = removed.blob_key() {
            self.discard_blob(key, "document purged").await;
        }
        info!(project = %document.project_id, document = %id, "document purged");
        Ok(())
    }

    /// Store a binary file from a stream. Binary content is always
    /// externalized, whatever its size.
    pub async fn upload_binary(
        &self,
        project_id: &ProjectId,
        caller: &UserId,
        request: UploadRequest,
        body: ByteReader,
    ) -> CoreResult<Document> {
        let name = validate::document_name(&request.name)?;
        validate::document_path(&request.path)?;
        ensure_type_matches(&request.path, request.file_type)?;
        if !request.file_type.is_binary() {
            return Err(CoreError::validation(format!(
                "{} is not a binary file type",
                request.file_type
            )));
        }
        if request.size > self.config.max_upload_bytes {
            return Err(CoreError::validation(format!(
                "upload of {} bytes exceeds the {} byte limit",
                request.size, self.config.max_upload_bytes
            )));
        }

        self.projects.authorize(project_id, caller, Access::Write).await?;
        self.ensure_path_free(project_id, &request.path).await?;

        let bytes = read_exact_size(body, request.size).await?;
        let id = DocumentId::new();
        let key = BlobKey::generate(project_id, &id);
        self.put_blob(&key, bytes, request.file_type).await?;

        let now = Utc::now();
        let document = Document {
            id,
            project_id: *project_id,
            name,
            path: request.path,
            file_type: request.file_type,
            content: ContentLocation::External(key),
            size: request.size,
            created_by: caller.clone(),
            created_at: now,
            last_modified_by: caller.clone(),
            last_modified_at: now,
            version: 1,
            deleted: false,
            deleted_at: None,
        };
        self.insert_or_release(&document).await?;
        info!(
            project = %project_id,
            document = %id,
            size = request.size,
            "binary uploaded"
        );
        Ok(document)
    }

    /// Stream a document's bytes, from the blob store or the inline record.
    pub async fn download(&self, id: &DocumentId, caller: &UserId) -> CoreResult<Download> {
        let document = self.load_live(id).await?;
        self.projects
            .authorize(&document.project_id, caller, Access::Read)
            .await?;
        let reader = match &document.content {
            ContentLocation::Inline(bytes) => reader_from_bytes(bytes.clone()),
            ContentLocation::External(key) => {
                bounded(
                    self.config.store_timeout,
                    "blob open",
                    dangling_as_backend(self.blobs.get(key), key),
                )
                .await?
            }
        };
        Ok(Download { document, reader })
    }

    /// Expiring pre-authorized link to an externalized document.
    ///
    /// `None` for inline content and for backends that cannot sign links.
    /// `ttl` is capped at `max_presign_ttl`.
    pub async fn download_link(
        &self,
        id: &DocumentId,
        caller: &UserId,
        ttl: Duration,
    ) -> CoreResult<Option<PresignedUrl>> {
        let document = self.load_live(id).await?;
        self.projects
            .authorize(&document.project_id, caller, Access::Read)
            .await?;
        let Some(key) = document.blob_key() else {
            return Ok(None);
        };
        let ttl = ttl.min(self.config.max_presign_ttl);
        bounded(
            self.config.store_timeout,
            "blob presign",
            dangling_as_backend(self.blobs.presigned_get(key, ttl), key),
        )
        .await
    }

    /// Folder/file tree of a project's live documents.
    pub async fn tree(&self, project_id: &ProjectId, caller: &UserId) -> CoreResult<TreeNode> {
        let documents = self.list(project_id, caller).await?;
        Ok(build_document_tree(&documents))
    }

    /// Remove every document record of a project, deleted ones included,
    /// then release every blob left under the project's prefix.
    ///
    /// The caller has already been authorized.
    pub(crate) async fn purge_project_documents(
        &self,
        project_id: &ProjectId,
    ) -> CoreResult<PurgeReport> {
        let mut report = PurgeReport::default();
        let documents = bounded(
            self.config.store_timeout,
            "document listing",
            self.metadata
                .find_documents(&DocumentFilter::project(*project_id).with_deleted()),
        )
        .await?;
        for document in documents {
            let removed = bounded(
                self.config.store_timeout,
                "document purge",
                self.metadata.purge_document(&document.id),
            )
            .await?;
            if removed.is_some() {
                report.documents_removed += 1;
            }
        }

        let prefix = BlobKey::project_prefix(project_id);
        let leftovers = bounded(
            self.config.store_timeout,
            "blob listing",
            self.blobs.list(&prefix),
        )
        .await;
        match leftovers {
            Ok(blobs) => {
                for meta in blobs {
                    if self.discard_blob(&meta.key, "project purged").await {
                        report.blobs_released += 1;
                    }
                }
            }
            Err(e) => warn!(project = %project_id, error = %e, "failed to list project blobs"),
        }
        Ok(report)
    }

    async fn load_any(&self, id: &DocumentId) -> CoreResult<Document> {
        bounded(
            self.config.store_timeout,
            "document lookup",
            self.metadata.find_document(id),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }

    async fn load_live(&self, id: &DocumentId) -> CoreResult<Document> {
        let document = self.load_any(id).await?;
        if document.deleted {
            return Err(CoreError::NotFound(format!("document {id}")));
        }
        Ok(document)
    }

    async fn ensure_path_free(&self, project_id: &ProjectId, path: &str) -> CoreResult<()> {
        let existing = bounded(
            self.config.store_timeout,
            "path lookup",
            self.metadata.find_document_by_path(project_id, path),
        )
        .await?;
        match existing {
            Some(_) => Err(CoreError::AlreadyExists(format!(
                "{path} in project {project_id}"
            ))),
            None => Ok(()),
        }
    }

    async fn put_blob(&self, key: &BlobKey, bytes: Bytes, file_type: FileType) -> CoreResult<()> {
        let meta = bounded(
            self.config.store_timeout,
            "blob write",
            self.blobs.put_bytes(key, bytes, file_type.content_type()),
        )
        .await?;
        debug!(key = %key, size = meta.size, checksum = %meta.checksum, "blob written");
        Ok(())
    }

    /// Insert a new record; if that fails, release the blob written for it.
    async fn insert_or_release(&self, document: &Document) -> CoreResult<()> {
        let result = bounded(
            self.config.store_timeout,
            "document insert",
            self.metadata.insert_document(document),
        )
        .await;
        if let (Err(e), Some(key)) = (&result, document.blob_key()) {
            self.release_unless_committed(&document.id, key, e, "document insert failed")
                .await;
        }
        result
    }

    /// Release a blob written for a record write that returned `error`.
    ///
    /// A transient storage error leaves the write's outcome unknown, so the
    /// record is read back first and the blob is kept while it references
    /// `key`. If that read fails as well the blob is left orphaned.
    async fn release_unless_committed(
        &self,
        id: &DocumentId,
        key: &BlobKey,
        error: &CoreError,
        reason: &str,
    ) {
        if !error.is_transient() {
            self.discard_blob(key, reason).await;
            return;
        }
        let stored = bounded(
            self.config.store_timeout,
            "document lookup",
            self.metadata.find_document(id),
        )
        .await;
        match stored {
            Ok(Some(document)) if document.blob_key() == Some(key) => {
                warn!(
                    document = %id,
                    key = %key,
                    error = %error,
                    "record write reported failure but committed; keeping blob"
                );
            }
            Ok(_) => {
                self.discard_blob(key, reason).await;
            }
            Err(e) => {
                warn!(
                    document = %id,
                    key = %key,
                    error = %e,
                    "cannot tell whether record write committed; leaving blob orphaned"
                );
            }
        }
    }

    /// Best-effort blob removal. Failures are logged and leave an orphan.
    async fn discard_blob(&self, key: &BlobKey, reason: &str) -> bool {
        match bounded(self.config.store_timeout, "blob delete", self.blobs.delete(key)).await {
            Ok(existed) => {
                debug!(key = %key, reason, existed, "blob released");
                existed
            }
            Err(e) => {
                warn!(key = %key, reason, error = %e, "failed to delete blob; leaving it orphaned");
                false
            }
        }
    }
}

fn ensure_type_matches(path: &str, file_type: FileType) -> CoreResult<()> {
    let found = FileType::from_path(path)?;
    if found != file_type {
        return Err(CoreError::validation(format!(
            "{path} names a {found} file but the document is {file_type}"
        )));
    }
    Ok(())
}

fn placement_of(document: &Document) -> Placement {
    if document.is_externalized() {
        Placement::External
    } else {
        Placement::Inline
    }
}

/// A record pointing at a missing blob is a backend inconsistency, not a
/// missing document.
async fn dangling_as_backend<T, F>(call: F, key: &BlobKey) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match call.await {
        Err(StoreError::NotFound(_)) => Err(StoreError::Backend(format!(
            "document references missing blob {key}"
        ))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use proptest::prelude::*;
    use quill_store::blob::read_all;
    use quill_types::Role;

    use super::*;
    use crate::error::ErrorKind;
    use crate::project::{NewCollaborator, NewProject};
    use crate::test_support::Harness;

    const THRESHOLD: u64 = 16;

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    fn text(len: usize) -> Bytes {
        Bytes::from(
            (0..len)
                .map(|i| b'a' + (i % 26) as u8)
                .collect::<Vec<u8>>(),
        )
    }

    fn tex(path: &str, content: Bytes) -> NewDocument {
        NewDocument::from_path(path, content).unwrap()
    }

    async fn setup() -> (Harness, ProjectId) {
        let h = Harness::with_threshold(THRESHOLD);
        let owner = user("olga");
        let p = h
            .projects
            .create(&owner, NewProject::named("Thesis"))
            .await
            .unwrap();
        for (name, role) in [("ed", Role::Editor), ("rita", Role::Reviewer), ("rob", Role::Reader)] {
            h.projects
                .add_collaborator(&p.id, &owner, NewCollaborator::new(user(name), role))
                .await
                .unwrap();
        }
        (h, p.id)
    }

    #[tokio::test]
    async fn small_text_stays_inline() {
        let (h, p) = setup().await;
        let content = text(THRESHOLD as usize);
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/main.tex", content.clone()))
            .await
            .unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.name, "main.tex");
        assert!(doc.blob_key().is_none());
        assert_eq!(doc.content.inline(), Some(&content));
        assert!(h.blobs.inner.is_empty());

        let read = h.documents.get(&doc.id, &user("rob")).await.unwrap();
        assert_eq!(read.content, content);
    }

    #[tokio::test]
    async fn large_text_is_externalized() {
        let (h, p) = setup().await;
        let content = text(THRESHOLD as usize + 1);
        let doc = h
            .documents
            .create(&p, &user("olga"), tex("/chapters/one.tex", content.clone()))
            .await
            .unwrap();
        let key = doc.blob_key().unwrap().clone();
        assert!(key.as_str().starts_with(&format!("projects/{p}/documents/{}/", doc.id)));
        assert!(doc.content.inline().is_none());
        assert_eq!(doc.size, content.len() as u64);

        let stored = h.metadata.inner.find_document(&doc.id).await.unwrap().unwrap();
        assert!(stored.content.inline().is_none());

        let read = h.documents.get(&doc.id, &user("rita")).await.unwrap();
        assert_eq!(read.content, content);
        assert_eq!(h.blobs.inner.get_bytes(&key).await.unwrap(), content);
    }

    #[tokio::test]
    async fn binary_is_externalized_even_when_tiny() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/fig.png", Bytes::from_static(b"\x89PNG")))
            .await
            .unwrap();
        assert!(doc.is_externalized());
        assert_eq!(doc.content_type(), "image/png");
        let meta = h.blobs.inner.stat(doc.blob_key().unwrap()).await.unwrap().unwrap();
        assert_eq!(meta.content_type, "image/png");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn create_get_roundtrip_respects_threshold(len in 0usize..64) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (h, p) = setup().await;
                let content = text(len);
                let doc = h
                    .documents
                    .create(&p, &user("ed"), tex("/a.tex", content.clone()))
                    .await
                    .unwrap();
                assert_eq!(doc.is_externalized(), len as u64 > THRESHOLD);
                assert_eq!(doc.content.inline().is_none(), len as u64 > THRESHOLD);
                let read = h.documents.get(&doc.id, &user("ed")).await.unwrap();
                assert_eq!(read.content, content);
            });
        }
    }

    #[tokio::test]
    async fn write_needs_editor_or_owner() {
        let (h, p) = setup().await;
        for name in ["rob", "rita", "mallory"] {
            let err = h
                .documents
                .create(&p, &user(name), tex("/x.tex", text(1)))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessDenied, "{name}");
        }

        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/x.tex", text(1)))
            .await
            .unwrap();
        let err = h
            .documents
            .update(&doc.id, &user("rob"), DocumentUpdate::content(1, text(2)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        let err = h.documents.delete(&doc.id, &user("rita")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        let err = h.documents.get(&doc.id, &user("mallory")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_storage() {
        let (h, p) = setup().await;
        for path in ["main.tex", "/a//b.tex", "/../x.tex", "/"] {
            let new = NewDocument {
                name: "x.tex".into(),
                path: path.into(),
                file_type: FileType::Tex,
                content: text(1),
            };
            let err = h.documents.create(&p, &user("ed"), new).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{path}");
        }
        let err = NewDocument::from_path("/notes.docx", text(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.metadata.inner.document_count(), 0);
    }

    #[tokio::test]
    async fn occupied_path_is_already_exists() {
        let (h, p) = setup().await;
        let a = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(1)))
            .await
            .unwrap();
        let err = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let b = h
            .documents
            .create(&p, &user("ed"), tex("/b.tex", text(1)))
            .await
            .unwrap();
        let err = h
            .documents
            .update(&b.id, &user("ed"), DocumentUpdate::move_to(1, "/a.tex"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        h.documents.delete(&a.id, &user("ed")).await.unwrap();
        let moved = h
            .documents
            .update(&b.id, &user("ed"), DocumentUpdate::move_to(1, "/a.tex"))
            .await
            .unwrap();
        assert_eq!(moved.path, "/a.tex");
        assert_eq!(moved.version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts_without_changes() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(4)))
            .await
            .unwrap();
        let v2 = h
            .documents
            .update(&doc.id, &user("olga"), DocumentUpdate::content(1, text(5)))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.last_modified_by, user("olga"));

        let err = h
            .documents
            .update(&doc.id, &user("ed"), DocumentUpdate::content(1, text(6)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let read = h.documents.get(&doc.id, &user("ed")).await.unwrap();
        assert_eq!(read.document.version, 2);
        assert_eq!(read.content, text(5));

        let err = h
            .documents
            .update(
                &doc.id,
                &user("ed"),
                DocumentUpdate {
                    expected_version: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_have_one_winner() {
        let (h, p) = setup().await;
        let h = Arc::new(h);
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/race.tex", text(3)))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..10usize {
            let h = Arc::clone(&h);
            let id = doc.id;
            tasks.push(tokio::spawn(async move {
                // Half the writers cross the threshold so both paths race.
                let len = if i % 2 == 0 { 4 + i } else { 40 + i };
                h.documents
                    .update(&id, &user("ed"), DocumentUpdate::content(1, text(len)))
                    .await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(updated) => {
                    winners += 1;
                    assert_eq!(updated.version, 2);
                }
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }
        assert_eq!(winners, 1);

        let stored = h.metadata.inner.find_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        // Losing writers released their blobs.
        let expected_blobs = usize::from(stored.is_externalized());
        assert_eq!(h.blobs.inner.len(), expected_blobs);
    }

    #[tokio::test]
    async fn content_migrates_between_placements() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let doc = h
            .documents
            .create(&p, &ed, tex("/grow.tex", text(4)))
            .await
            .unwrap();
        assert!(!doc.is_externalized());

        let big = h
            .documents
            .update(&doc.id, &ed, DocumentUpdate::content(1, text(100)))
            .await
            .unwrap();
        let first_key = big.blob_key().unwrap().clone();
        assert!(big.content.inline().is_none());
        assert_eq!(h.blobs.inner.len(), 1);

        let bigger = h
            .documents
            .update(&doc.id, &ed, DocumentUpdate::content(2, text(200)))
            .await
            .unwrap();
        let second_key = bigger.blob_key().unwrap().clone();
        assert_ne!(first_key, second_key);
        assert!(!h.blobs.inner.exists(&first_key).await.unwrap());
        assert_eq!(h.blobs.inner.len(), 1);

        let small = h
            .documents
            .update(&doc.id, &ed, DocumentUpdate::content(3, text(2)))
            .await
            .unwrap();
        assert_eq!(small.content.inline(), Some(&text(2)));
        assert_eq!(small.version, 4);
        assert!(h.blobs.inner.is_empty());
    }

    #[tokio::test]
    async fn rename_keeps_content_and_blob() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/big.tex", text(50)))
            .await
            .unwrap();
        let renamed = h
            .documents
            .update(
                &doc.id,
                &user("ed"),
                DocumentUpdate {
                    expected_version: 1,
                    name: Some("Big chapter".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Big chapter");
        assert_eq!(renamed.blob_key(), doc.blob_key());
        assert_eq!(h.blobs.inner.len(), 1);
    }

    #[tokio::test]
    async fn failed_blob_write_persists_nothing() {
        let (h, p) = setup().await;
        h.blobs.fail_put.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .create(&p, &user("ed"), tex("/big.tex", text(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_transient());
        assert_eq!(h.metadata.inner.document_count(), 0);
        assert!(h.blobs.inner.is_empty());
    }

    #[tokio::test]
    async fn failed_insert_releases_blob() {
        let (h, p) = setup().await;
        h.metadata.fail_insert_document.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .create(&p, &user("ed"), tex("/big.tex", text(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(h.blobs.inner.is_empty());

        let err = h
            .documents
            .upload_binary(
                &p,
                &user("ed"),
                UploadRequest::from_path("/fig.pdf", 3).unwrap(),
                reader_from_bytes(Bytes::from_static(b"pdf")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(h.blobs.inner.is_empty());
    }

    #[tokio::test]
    async fn failed_conditional_write_releases_new_blob() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/big.tex", text(100)))
            .await
            .unwrap();
        let committed = doc.blob_key().unwrap().clone();

        h.metadata.fail_update_document.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .update(&doc.id, &user("ed"), DocumentUpdate::content(1, text(120)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(h.blobs.inner.len(), 1);
        assert!(h.blobs.inner.exists(&committed).await.unwrap());

        let read = h.documents.get(&doc.id, &user("ed")).await.unwrap();
        assert_eq!(read.content, text(100));
    }

    #[tokio::test]
    async fn failed_blob_cleanup_is_not_fatal() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let shrinking = h
            .documents
            .create(&p, &ed, tex("/shrink.tex", text(100)))
            .await
            .unwrap();
        let doomed = h
            .documents
            .create(&p, &ed, tex("/doomed.tex", text(100)))
            .await
            .unwrap();
        h.blobs.fail_delete.store(true, Ordering::SeqCst);

        let small = h
            .documents
            .update(&shrinking.id, &ed, DocumentUpdate::content(1, text(3)))
            .await
            .unwrap();
        assert!(!small.is_externalized());

        h.documents.delete(&doomed.id, &ed).await.unwrap();
        let err = h.documents.get(&doomed.id, &ed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Both old blobs are orphaned, never dangling.
        assert_eq!(h.blobs.inner.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_blob_store_times_out() {
        let (h, p) = setup().await;
        h.blobs.stall_put.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .create(&p, &user("ed"), tex("/big.tex", text(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_transient());
        assert_eq!(h.metadata.inner.document_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_committed_before_timeout_stays_readable() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let doc = h
            .documents
            .create(&p, &ed, tex("/big.tex", text(100)))
            .await
            .unwrap();

        h.metadata.stall_after_update.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .update(&doc.id, &ed, DocumentUpdate::content(1, text(120)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_transient());
        h.metadata.stall_after_update.store(false, Ordering::SeqCst);

        let read = h.documents.get(&doc.id, &ed).await.unwrap();
        assert_eq!(read.document.version, 2);
        assert_eq!(read.content, text(120));
        // The replaced blob is orphaned, never dangling.
        assert_eq!(h.blobs.inner.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_committed_before_timeout_stays_readable() {
        let (h, p) = setup().await;
        let ed = user("ed");
        h.metadata.stall_after_insert.store(true, Ordering::SeqCst);
        let err = h
            .documents
            .create(&p, &ed, tex("/big.tex", text(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_transient());
        h.metadata.stall_after_insert.store(false, Ordering::SeqCst);

        let listed = h.documents.list(&p, &ed).await.unwrap();
        assert_eq!(listed.len(), 1);
        let read = h.documents.get(&listed[0].id, &ed).await.unwrap();
        assert_eq!(read.content, text(100));
        assert_eq!(h.blobs.inner.len(), 1);
    }

    #[tokio::test]
    async fn move_keeps_file_type() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let doc = h
            .documents
            .create(&p, &ed, tex("/a.tex", text(3)))
            .await
            .unwrap();
        let err = h
            .documents
            .update(&doc.id, &ed, DocumentUpdate::move_to(1, "/a.png"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let read = h.documents.get(&doc.id, &ed).await.unwrap();
        assert_eq!(read.document.path, "/a.tex");
        assert_eq!(read.document.version, 1);

        let fig = h
            .documents
            .create(&p, &ed, tex("/fig.jpg", text(3)))
            .await
            .unwrap();
        let moved = h
            .documents
            .update(&fig.id, &ed, DocumentUpdate::move_to(1, "/figures/fig.jpeg"))
            .await
            .unwrap();
        assert_eq!(moved.file_type, FileType::Jpg);

        let mislabeled = NewDocument {
            name: "x.tex".into(),
            path: "/x.tex".into(),
            file_type: FileType::Png,
            content: text(1),
        };
        let err = h.documents.create(&p, &ed, mislabeled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.metadata.inner.document_count(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_frees_path() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let doc = h
            .documents
            .create(&p, &ed, tex("/gone.tex", text(100)))
            .await
            .unwrap();

        h.documents.delete(&doc.id, &ed).await.unwrap();
        h.documents.delete(&doc.id, &ed).await.unwrap();
        assert!(h.blobs.inner.is_empty());

        let stored = h.metadata.inner.find_document(&doc.id).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.version, 2);

        assert_eq!(
            h.documents.get(&doc.id, &ed).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            h.documents
                .update(&doc.id, &ed, DocumentUpdate::content(2, text(1)))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert!(h.documents.list(&p, &ed).await.unwrap().is_empty());

        h.documents
            .create(&p, &ed, tex("/gone.tex", text(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hard_delete_removes_record_and_blob() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let live = h
            .documents
            .create(&p, &ed, tex("/live.tex", text(100)))
            .await
            .unwrap();
        let soft = h
            .documents
            .create(&p, &ed, tex("/soft.tex", text(1)))
            .await
            .unwrap();
        h.documents.delete(&soft.id, &ed).await.unwrap();

        h.documents.hard_delete(&live.id, &ed).await.unwrap();
        h.documents.hard_delete(&soft.id, &ed).await.unwrap();
        assert_eq!(h.metadata.inner.document_count(), 0);
        assert!(h.blobs.inner.is_empty());

        let err = h.documents.hard_delete(&live.id, &ed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn hard_delete_after_concurrent_purge_leaves_blob_to_winner() {
        let (h, p) = setup().await;
        let ed = user("ed");
        let doc = h
            .documents
            .create(&p, &ed, tex("/big.tex", text(100)))
            .await
            .unwrap();
        h.metadata.lose_purge_race.store(true, Ordering::SeqCst);

        h.documents.hard_delete(&doc.id, &ed).await.unwrap();
        assert_eq!(h.metadata.inner.document_count(), 0);
        assert!(h.blobs.inner.exists(doc.blob_key().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn upload_binary_streams_to_blob_store() {
        let (h, p) = setup().await;
        let body = Bytes::from_static(b"%PDF-1.7 tiny");
        let doc = h
            .documents
            .upload_binary(
                &p,
                &user("ed"),
                UploadRequest::from_path("/figures/plot.pdf", body.len() as u64).unwrap(),
                reader_from_bytes(body.clone()),
            )
            .await
            .unwrap();
        assert!(doc.is_externalized());
        assert_eq!(doc.file_type, FileType::Pdf);
        assert_eq!(doc.version, 1);

        let download = h.documents.download(&doc.id, &user("rob")).await.unwrap();
        assert_eq!(read_all(download.reader).await.unwrap(), body);
    }

    #[tokio::test]
    async fn upload_binary_rejections() {
        let mut config = CoreConfig::with_threshold(THRESHOLD);
        config.max_upload_bytes = 8;
        let h = Harness::new(config);
        let ed = user("olga");
        let p = h.projects.create(&ed, NewProject::named("P")).await.unwrap().id;

        let err = h
            .documents
            .upload_binary(
                &p,
                &ed,
                UploadRequest::from_path("/main.tex", 3).unwrap(),
                reader_from_bytes(text(3)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = h
            .documents
            .upload_binary(
                &p,
                &ed,
                UploadRequest::from_path("/big.png", 9).unwrap(),
                reader_from_bytes(text(9)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        for actual in [3, 7] {
            let err = h
                .documents
                .upload_binary(
                    &p,
                    &ed,
                    UploadRequest::from_path("/short.png", 5).unwrap(),
                    reader_from_bytes(text(actual)),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{actual} bytes");
        }
        assert!(h.blobs.inner.is_empty());
        assert_eq!(h.metadata.inner.document_count(), 0);
    }

    #[tokio::test]
    async fn download_serves_inline_content_as_stream() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(5)))
            .await
            .unwrap();
        let download = h.documents.download(&doc.id, &user("rita")).await.unwrap();
        assert_eq!(download.document.id, doc.id);
        assert_eq!(read_all(download.reader).await.unwrap(), text(5));
    }

    #[tokio::test]
    async fn missing_blob_is_a_storage_error() {
        let (h, p) = setup().await;
        let doc = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(100)))
            .await
            .unwrap();
        h.blobs.inner.delete(doc.blob_key().unwrap()).await.unwrap();

        let err = h.documents.get(&doc.id, &user("ed")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_transient());
        let err = h.documents.download(&doc.id, &user("ed")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn download_links() {
        let (h, p) = setup().await;
        let inline = h
            .documents
            .create(&p, &user("ed"), tex("/a.tex", text(2)))
            .await
            .unwrap();
        let external = h
            .documents
            .create(&p, &user("ed"), tex("/b.png", text(2)))
            .await
            .unwrap();

        let none = h
            .documents
            .download_link(&inline.id, &user("rob"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(none.is_none());

        let before = Utc::now();
        let link = h
            .documents
            .download_link(&external.id, &user("rob"), Duration::from_secs(86_400 * 7))
            .await
            .unwrap()
            .unwrap();
        assert!(h.blobs.inner.verify_link(&link.url, Utc::now()));
        let cap = chrono::Duration::from_std(CoreConfig::default().max_presign_ttl).unwrap();
        assert!(link.expires_at <= before + cap + chrono::Duration::seconds(1));

        let err = h
            .documents
            .download_link(&external.id, &user("mallory"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn project_tree() {
        let (h, p) = setup().await;
        let ed = user("ed");
        for path in ["/a/b.tex", "/a/c.tex", "/d.png"] {
            h.documents.create(&p, &ed, tex(path, text(1))).await.unwrap();
        }
        let tree = h.documents.tree(&p, &user("rob")).await.unwrap();
        assert_eq!(tree.path, "/");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].name, "a");
        assert!(tree.children[0].is_folder());
        assert_eq!(tree.children[0].children.len(), 2);
        assert_eq!(tree.children[1].name, "d.png");
        assert_eq!(tree.count_files(), 3);
        assert_eq!(tree.count_folders(), 1);
    }

    #[tokio::test]
    async fn empty_project_tree_has_no_children() {
        let (h, p) = setup().await;
        let tree = h.documents.tree(&p, &user("olga")).await.unwrap();
        assert!(tree.children.is_empty());
    }
}
