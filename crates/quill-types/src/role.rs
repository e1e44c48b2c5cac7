use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Collaborator role on a project.
///
/// Roles are a closed set; every capability check goes through
/// [`Role::permits`] rather than comparing role names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control, including collaborator management and deletion.
    Owner,
    /// May read and write documents.
    Editor,
    /// May read project and documents.
    Reviewer,
    /// May read project and documents.
    Reader,
}

/// Class of operation being authorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    /// Read project metadata and documents.
    Read,
    /// Write document content, names and paths.
    Write,
    /// Manage collaborators, project settings and deletion.
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Owner, Role::Editor, Role::Reviewer, Role::Reader];

    /// Whether this role may perform operations of the given class.
    pub fn permits(&self, access: Access) -> bool {
        match access {
            Access::Read => true,
            Access::Write => matches!(self, Self::Owner | Self::Editor),
            Access::Admin => matches!(self, Self::Owner),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Reviewer => "reviewer",
            Self::Reader => "reader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "reviewer" => Ok(Self::Reviewer),
            "reader" => Ok(Self::Reader),
            _ => Err(TypeError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
            Self::Admin => f.write_str("admin"),
        }
    }
}
