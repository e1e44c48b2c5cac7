//! Project lifecycle, collaborator management and access control.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quill_store::{
    MetadataStore, Membership, Page, PageRequest, ProjectChanges, ProjectFilter, ProjectSort,
};
use quill_types::{validate, Access, Collaborator, DocumentId, Project, ProjectId, Role, UserId};

use crate::config::CoreConfig;
use crate::deadline::bounded;
use crate::error::{CoreError, CoreResult};

/// Input for [`ProjectManager::create`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Fields changed by [`ProjectManager::update`]. `None` leaves a field alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the root document.
    pub root_document: Option<Option<DocumentId>>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.root_document.is_none()
    }
}

/// Input for [`ProjectManager::add_collaborator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCollaborator {
    pub user_id: UserId,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl NewCollaborator {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            email: None,
            display_name: None,
        }
    }

    /// Build from a role name as received from a client.
    pub fn parse(user_id: UserId, role: &str) -> CoreResult<Self> {
        Ok(Self::new(user_id, role.parse()?))
    }
}

/// Owns project records and answers every access question about them.
pub struct ProjectManager {
    metadata: Arc<dyn MetadataStore>,
    config: Arc<CoreConfig>,
}

impl ProjectManager {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: Arc<CoreConfig>) -> Self {
        Self { metadata, config }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub async fn create(&self, owner: &UserId, new: NewProject) -> CoreResult<Project> {
        validate::user_id(owner)?;
        let name = validate::project_name(&new.name)?;
        let description = validate::description(&new.description)?;
        let tags = validate::tags(&new.tags)?;

        let project = Project::new(owner.clone(), name, description, tags, Utc::now());
        bounded(
            self.config.store_timeout,
            "project insert",
            self.metadata.insert_project(&project),
        )
        .await?;
        info!(project = %project.id, owner = %owner, name = %project.name, "project created");
        Ok(project)
    }

    /// Read a project the caller belongs to.
    ///
    /// Also records the access time in the background; that write never
    /// delays or fails this call.
    pub async fn get(&self, id: &ProjectId, caller: &UserId) -> CoreResult<Project> {
        let project = self.authorize(id, caller, Access::Read).await?;
        self.touch_in_background(project.id);
        Ok(project)
    }

    /// Load a live project and check that `caller` holds `access` on it.
    ///
    /// Absent and archived projects are `NotFound`; non-members and members
    /// whose role is too weak are `AccessDenied`. A malformed caller id is
    /// rejected before the store is consulted.
    pub async fn authorize(
        &self,
        id: &ProjectId,
        caller: &UserId,
        access: Access,
    ) -> CoreResult<Project> {
        validate::user_id(caller)?;
        let project = self
            .find(id)
            .await?
            .filter(|p| !p.archived)
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;
        if !project.permits(caller, access) {
            debug!(project = %id, user = %caller, %access, "access denied");
            return Err(CoreError::AccessDenied {
                user: caller.clone(),
                project: *id,
                access,
            });
        }
        Ok(project)
    }

    /// Like [`authorize`](Self::authorize) for the owner, but archived
    /// projects stay addressable.
    pub(crate) async fn authorize_owner(&self, id: &ProjectId, caller: &UserId) -> CoreResult<Project> {
        validate::user_id(caller)?;
        let project = self
            .find(id)
            .await?
            .filter(|p| !p.archived || &p.owner_id == caller)
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;
        if &project.owner_id != caller {
            return Err(CoreError::AccessDenied {
                user: caller.clone(),
                project: *id,
                access: Access::Admin,
            });
        }
        Ok(project)
    }

    /// Projects the caller owns, most recently updated first.
    pub async fn list_owned(&self, caller: &UserId, page: PageRequest) -> CoreResult<Page<Project>> {
        self.list(caller, Membership::Owned, ProjectSort::UpdatedDesc, page)
            .await
    }

    /// Projects shared with the caller, most recently updated first.
    pub async fn list_shared(&self, caller: &UserId, page: PageRequest) -> CoreResult<Page<Project>> {
        self.list(caller, Membership::Shared, ProjectSort::UpdatedDesc, page)
            .await
    }

    /// Projects the caller belongs to, most recently accessed first.
    pub async fn list_recent(&self, caller: &UserId, limit: usize) -> CoreResult<Vec<Project>> {
        let page = self
            .list(
                caller,
                Membership::Any,
                ProjectSort::LastAccessedDesc,
                PageRequest::first(limit),
            )
            .await?;
        Ok(page.items)
    }

    async fn list(
        &self,
        caller: &UserId,
        membership: Membership,
        sort: ProjectSort,
        page: PageRequest,
    ) -> CoreResult<Page<Project>> {
        validate::user_id(caller)?;
        let page = PageRequest::new(self.config.clamp_limit(page.limit), page.offset);
        let filter = ProjectFilter::member(caller.clone(), membership);
        bounded(
            self.config.store_timeout,
            "project listing",
            self.metadata.find_projects(&filter, sort, page),
        )
        .await
    }

    /// Owner-only settings update.
    pub async fn update(
        &self,
        id: &ProjectId,
        caller: &UserId,
        update: ProjectUpdate,
    ) -> CoreResult<Project> {
        if update.is_empty() {
            return Err(CoreError::validation("project update names no fields"));
        }
        let name = update.name.as_deref().map(validate::project_name).transpose()?;
        let description = update
            .description
            .as_deref()
            .map(validate::description)
            .transpose()?;
        let tags = update.tags.as_ref().map(|t| validate::tags(t)).transpose()?;

        let project = self.authorize(id, caller, Access::Admin).await?;
        if let Some(Some(root)) = update.root_document {
            self.check_root_document(&project, &root).await?;
        }

        let updated = self
            .modify(id, caller, |_| {
                let mut changes = ProjectChanges::at(Utc::now());
                changes.name = name.clone();
                changes.description = description.clone();
                changes.tags = tags.clone();
                changes.root_document_id = update.root_document;
                Ok(changes)
            })
            .await?;
        info!(project = %id, revision = updated.revision, "project updated");
        Ok(updated)
    }

    async fn check_root_document(&self, project: &Project, root: &DocumentId) -> CoreResult<()> {
        let document = bounded(
            self.config.store_timeout,
            "document lookup",
            self.metadata.find_document(root),
        )
        .await?;
        match document {
            Some(d) if !d.deleted && d.project_id == project.id => Ok(()),
            _ => Err(CoreError::validation(format!(
                "root document {root} is not a live document of project {}",
                project.id
            ))),
        }
    }

    /// Owner-only soft delete. The project disappears from every read.
    pub async fn delete(&self, id: &ProjectId, caller: &UserId) -> CoreResult<()> {
        self.authorize(id, caller, Access::Admin).await?;
        let archived = bounded(
            self.config.store_timeout,
            "project archive",
            self.metadata.archive_project(id, Utc::now()),
        )
        .await?;
        if archived {
            info!(project = %id, "project archived");
        }
        Ok(())
    }

    pub async fn add_collaborator(
        &self,
        id: &ProjectId,
        caller: &UserId,
        new: NewCollaborator,
    ) -> CoreResult<Project> {
        validate::user_id(&new.user_id)?;
        if new.role == Role::Owner {
            return Err(CoreError::validation("the owner role cannot be granted"));
        }
        let updated = self
            .modify(id, caller, |project| {
                if project.is_member(&new.user_id) {
                    return Err(CoreError::AlreadyExists(format!(
                        "{} already collaborates on project {id}",
                        new.user_id
                    )));
                }
                let now = Utc::now();
                let mut collaborator =
                    Collaborator::new(new.user_id.clone(), new.role, caller.clone(), now);
                collaborator.email = new.email.clone();
                collaborator.display_name = new.display_name.clone();

                let mut collaborators = project.collaborators.clone();
                collaborators.push(collaborator);
                let mut changes = ProjectChanges::at(now);
                changes.collaborators = Some(collaborators);
                Ok(changes)
            })
            .await?;
        info!(project = %id, user = %new.user_id, role = %new.role, "collaborator added");
        Ok(updated)
    }

    pub async fn remove_collaborator(
        &self,
        id: &ProjectId,
        caller: &UserId,
        user: &UserId,
    ) -> CoreResult<Project> {
        validate::user_id(user)?;
        let updated = self
            .modify(id, caller, |project| {
                ensure_not_owner(project, user)?;
                ensure_collaborator(project, user)?;
                let mut changes = ProjectChanges::at(Utc::now());
                changes.collaborators = Some(
                    project
                        .collaborators
                        .iter()
                        .filter(|c| &c.user_id != user)
                        .cloned()
                        .collect(),
                );
                Ok(changes)
            })
            .await?;
        info!(project = %id, user = %user, "collaborator removed");
        Ok(updated)
    }

    pub async fn update_collaborator_role(
        &self,
        id: &ProjectId,
        caller: &UserId,
        user: &UserId,
        role: Role,
    ) -> CoreResult<Project> {
        validate::user_id(user)?;
        let updated = self
            .modify(id, caller, |project| {
                ensure_not_owner(project, user)?;
                if role == Role::Owner {
                    return Err(CoreError::validation("the owner role cannot be granted"));
                }
                ensure_collaborator(project, user)?;
                let mut collaborators = project.collaborators.clone();
                for c in collaborators.iter_mut().filter(|c| &c.user_id == user) {
                    c.role = role;
                }
                let mut changes = ProjectChanges::at(Utc::now());
                changes.collaborators = Some(collaborators);
                Ok(changes)
            })
            .await?;
        info!(project = %id, user = %user, %role, "collaborator role changed");
        Ok(updated)
    }

    /// Owner-only read-check-write against the project revision.
    ///
    /// `plan` sees the freshly loaded project and returns the changes to
    /// apply. A lost revision race reloads and replans, up to
    /// `max_cas_retries` times.
    async fn modify<F>(&self, id: &ProjectId, caller: &UserId, mut plan: F) -> CoreResult<Project>
    where
        F: FnMut(&Project) -> CoreResult<ProjectChanges> + Send,
    {
        let mut retries = 0;
        loop {
            let project = self.authorize(id, caller, Access::Admin).await?;
            let changes = plan(&project)?;
            let result = bounded(
                self.config.store_timeout,
                "project update",
                self.metadata.update_project(id, project.revision, changes),
            )
            .await;
            match result {
                Err(CoreError::Conflict(reason)) if retries < self.config.max_cas_retries => {
                    retries += 1;
                    debug!(project = %id, retries, %reason, "project revision moved; retrying");
                }
                other => return other,
            }
        }
    }

    async fn find(&self, id: &ProjectId) -> CoreResult<Option<Project>> {
        bounded(
            self.config.store_timeout,
            "project lookup",
            self.metadata.find_project(id),
        )
        .await
    }

    fn touch_in_background(&self, id: ProjectId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(project = %id, "no runtime; skipping access-time update");
            return;
        };
        let metadata = Arc::clone(&self.metadata);
        let limit = self.config.touch_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(limit, metadata.touch_project(&id, Utc::now())).await {
                Ok(Ok(())) => debug!(project = %id, "access time updated"),
                Ok(Err(e)) => warn!(project = %id, error = %e, "failed to update access time"),
                Err(_) => warn!(
                    project = %id,
                    timeout_ms = limit.as_millis() as u64,
                    "access-time update timed out"
                ),
            }
        });
    }
}

fn ensure_not_owner(project: &Project, user: &UserId) -> CoreResult<()> {
    if &project.owner_id == user {
        return Err(CoreError::InvalidOperation(format!(
            "{user} owns project {}; ownership cannot be changed",
            project.id
        )));
    }
    Ok(())
}

fn ensure_collaborator(project: &Project, user: &UserId) -> CoreResult<()> {
    if project.collaborator(user).is_none() {
        return Err(CoreError::NotFound(format!(
            "collaborator {user} on project {}",
            project.id
        )));
    }
    Ok(())
}
