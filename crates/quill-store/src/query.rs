//! Filters, sort orders, pagination, and change sets for metadata queries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quill_types::{Collaborator, ContentLocation, DocumentId, Project, ProjectId, Role, UserId};

/// How a user relates to the projects being listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    /// The user owns the project.
    Owned,
    /// The user is a collaborator but not the owner.
    Shared,
    /// Either of the above.
    Any,
}

/// Project query filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectFilter {
    pub user: Option<(UserId, Membership)>,
    pub include_archived: bool,
}

impl ProjectFilter {
    /// Live projects related to `user` in the given way.
    pub fn member(user: UserId, membership: Membership) -> Self {
        Self {
            user: Some((user, membership)),
            include_archived: false,
        }
    }

    pub fn matches(&self, project: &Project) -> bool {
        if project.archived && !self.include_archived {
            return false;
        }
        match &self.user {
            None => true,
            Some((user, membership)) => match (membership, project.role_of(user)) {
                (_, None) => false,
                (Membership::Owned, Some(role)) => role == Role::Owner,
                (Membership::Shared, Some(role)) => role != Role::Owner,
                (Membership::Any, Some(_)) => true,
            },
        }
    }
}

/// Sort order for project listings. Ties break on project id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectSort {
    /// Most recently updated first.
    UpdatedDesc,
    /// Most recently accessed first; never-accessed projects last.
    LastAccessedDesc,
    /// Most recently created first.
    CreatedDesc,
}

/// Offset pagination request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

/// One page of results plus the total number of matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Field changes applied by a conditional project update.
///
/// Only `Some` fields are written. The store bumps `revision`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub root_document_id: Option<Option<DocumentId>>,
    pub collaborators: Option<Vec<Collaborator>>,
    pub archived: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectChanges {
    /// An empty change set stamped with `updated_at`.
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self {
            name: None,
            description: None,
            tags: None,
            root_document_id: None,
            collaborators: None,
            archived: None,
            updated_at,
        }
    }

    pub(crate) fn apply(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(description) = self.description {
            project.description = description;
        }
        if let Some(tags) = self.tags {
            project.tags = tags;
        }
        if let Some(root) = self.root_document_id {
            project.root_document_id = root;
        }
        if let Some(collaborators) = self.collaborators {
            project.collaborators = collaborators;
        }
        if let Some(archived) = self.archived {
            project.archived = archived;
        }
        project.updated_at = self.updated_at;
        project.revision += 1;
    }
}

/// Document query filter. Results are ordered by path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentFilter {
    pub project_id: ProjectId,
    pub include_deleted: bool,
    pub path_prefix: Option<String>,
}

impl DocumentFilter {
    /// Live documents of a project.
    pub fn project(project_id: ProjectId) -> Self {
        Self {
            project_id,
            include_deleted: false,
            path_prefix: None,
        }
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }
}

/// Field changes applied by a conditional document update.
///
/// The store bumps `version` and stamps `last_modified_by/at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChanges {
    pub name: Option<String>,
    pub path: Option<String>,
    /// New placement and byte size.
    pub content: Option<(ContentLocation, u64)>,
    pub modified_by: UserId,
    pub modified_at: DateTime<Utc>,
}

impl DocumentChanges {
    pub fn by(modified_by: UserId, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: None,
            path: None,
            content: None,
            modified_by,
            modified_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.path.is_none() && self.content.is_none()
    }
}
