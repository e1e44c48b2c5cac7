use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file_type::FileType;
use crate::id::{BlobKey, DocumentId, ProjectId, UserId};

/// Where a document's bytes live.
///
/// The two variants are mutually exclusive: a record either carries its
/// content inline or references an object in the blob store, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "placement", content = "value", rename_all = "lowercase")]
pub enum ContentLocation {
    /// Bytes stored directly in the metadata record.
    Inline(Bytes),
    /// Bytes stored in the blob store under this key.
    External(BlobKey),
}

impl ContentLocation {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    pub fn blob_key(&self) -> Option<&BlobKey> {
        match self {
            Self::External(key) => Some(key),
            Self::Inline(_) => None,
        }
    }

    pub fn inline(&self) -> Option<&Bytes> {
        match self {
            Self::Inline(bytes) => Some(bytes),
            Self::External(_) => None,
        }
    }
}

/// A document record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub project_id: ProjectId,
    pub name: String,
    pub path: String,
    pub file_type: FileType,
    pub content: ContentLocation,
    pub size: u64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: UserId,
    pub last_modified_at: DateTime<Utc>,
    /// Starts at 1 and increases by exactly one on every mutation.
    pub version: u64,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn blob_key(&self) -> Option<&BlobKey> {
        self.content.blob_key()
    }

    pub fn is_externalized(&self) -> bool {
        self.content.is_external()
    }

    pub fn content_type(&self) -> &'static str {
        self.file_type.content_type()
    }
}
