use quill_store::StoreError;
use quill_types::{Access, ProjectId, TypeError, UserId};

/// The error kinds callers can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Conflict,
    AlreadyExists,
    Validation,
    InvalidOperation,
    Storage,
}

/// Errors returned by the project and document managers.
///
/// Every failure maps to exactly one [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The entity is absent or soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's role does not permit the operation.
    #[error("access denied: {user} lacks {access} access to project {project}")]
    AccessDenied {
        user: UserId,
        project: ProjectId,
        access: Access,
    },

    /// A conditional write lost to a concurrent one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Duplicate path or collaborator.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request is well-formed but not allowed on this entity.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Metadata or blob backend failure.
    #[error("storage error ({}): {message}", transience(.transient))]
    Storage { message: String, transient: bool },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn storage(message: impl Into<String>, transient: bool) -> Self {
        Self::Storage {
            message: message.into(),
            transient,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyExists(what) => Self::AlreadyExists(what),
            StoreError::VersionMismatch {
                id,
                expected,
                actual,
            } => Self::Conflict(format!(
                "{id} is at version {actual}, update expected {expected}"
            )),
            StoreError::SizeMismatch { .. } => Self::Validation(e.to_string()),
            other => {
                let transient = other.is_transient();
                Self::storage(other.to_string(), transient)
            }
        }
    }
}

impl From<TypeError> for CoreError {
    fn from(e: TypeError) -> Self {
        Self::Validation(e.to_string())
    }
}

fn transience(transient: &bool) -> &'static str {
    if *transient {
        "transient"
    } else {
        "permanent"
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
