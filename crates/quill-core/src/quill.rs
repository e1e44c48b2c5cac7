use std::sync::Arc;

use tracing::info;

use quill_store::{BlobStore, InMemoryBlobStore, InMemoryMetadataStore, MetadataStore};
use quill_types::{ProjectId, UserId};

use crate::config::CoreConfig;
use crate::deadline::bounded;
use crate::document::{DocumentManager, PurgeReport};
use crate::error::{CoreError, CoreResult};
use crate::project::ProjectManager;

/// Entry point wiring both managers over one pair of stores.
pub struct Quill {
    config: Arc<CoreConfig>,
    metadata: Arc<dyn MetadataStore>,
    projects: Arc<ProjectManager>,
    documents: DocumentManager,
}

impl Quill {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: CoreConfig,
    ) -> CoreResult<Self> {
        config
            .validate()
            .map_err(|e| CoreError::validation(e.to_string()))?;
        let config = Arc::new(config);
        let projects = Arc::new(ProjectManager::new(Arc::clone(&metadata), Arc::clone(&config)));
        let documents = DocumentManager::new(
            Arc::clone(&projects),
            Arc::clone(&metadata),
            blobs,
            Arc::clone(&config),
        );
        Ok(Self {
            config,
            metadata,
            projects,
            documents,
        })
    }

    /// Both stores in memory. Useful for tests and demos.
    pub fn in_memory(config: CoreConfig) -> CoreResult<Self> {
        Self::new(
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryBlobStore::new("quill")),
            config,
        )
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    pub fn documents(&self) -> &DocumentManager {
        &self.documents
    }

    /// Physically remove a project and everything in it. Owner only;
    /// archived projects remain purgeable.
    pub async fn purge_project(&self, id: &ProjectId, caller: &UserId) -> CoreResult<PurgeReport> {
        self.projects.authorize_owner(id, caller).await?;
        let report = self.documents.purge_project_documents(id).await?;
        bounded(
            self.config.store_timeout,
            "project purge",
            self.metadata.purge_project(id),
        )
        .await?;
        info!(
            project = %id,
            documents = report.documents_removed,
            blobs = report.blobs_released,
            "project purged"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Quill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quill")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
