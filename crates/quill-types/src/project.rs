use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DocumentId, ProjectId, UserId};
use crate::role::{Access, Role};

/// A user holding a role on a project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub user_id: UserId,
    pub role: Role,
    pub added_at: DateTime<Utc>,
    pub added_by: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Collaborator {
    pub fn new(user_id: UserId, role: Role, added_by: UserId, added_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            added_at,
            added_by,
            email: None,
            display_name: None,
        }
    }
}

/// A project record with its embedded collaborator list.
///
/// The owner appears exactly once in `collaborators`, with [`Role::Owner`].
/// `revision` is the compare-and-set token for project writes; it does not
/// move when only `last_accessed_at` is touched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub owner_id: UserId,
    pub collaborators: Vec<Collaborator>,
    pub root_document_id: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub tags: BTreeSet<String>,
    pub revision: u64,
}

impl Project {
    /// Create a project owned by `owner`. Fields are assumed validated.
    pub fn new(
        owner: UserId,
        name: String,
        description: String,
        tags: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let owner_entry = Collaborator::new(owner.clone(), Role::Owner, owner.clone(), now);
        Self {
            id: ProjectId::new(),
            name,
            description,
            owner_id: owner,
            collaborators: vec![owner_entry],
            root_document_id: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            archived: false,
            tags,
            revision: 1,
        }
    }

    pub fn collaborator(&self, user: &UserId) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| &c.user_id == user)
    }

    /// Role of `user` on this project, if any.
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if user == &self.owner_id {
            return Some(Role::Owner);
        }
        self.collaborator(user).map(|c| c.role)
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.role_of(user).is_some()
    }

    pub fn permits(&self, user: &UserId, access: Access) -> bool {
        self.role_of(user).is_some_and(|role| role.permits(access))
    }

    /// Checks the owner/collaborator invariants.
    pub fn is_consistent(&self) -> bool {
        let owners: Vec<_> = self
            .collaborators
            .iter()
            .filter(|c| c.role == Role::Owner)
            .collect();
        let unique: BTreeSet<_> = self.collaborators.iter().map(|c| &c.user_id).collect();
        owners.len() == 1
            && owners[0].user_id == self.owner_id
            && unique.len() == self.collaborators.len()
    }
}
