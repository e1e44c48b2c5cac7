use std::io;

/// Errors from metadata and blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record or object does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A conditional update named a stale version.
    #[error("version mismatch for {id}: expected {expected}, found {actual}")]
    VersionMismatch {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// The declared size of a stream did not match the bytes read.
    #[error("size mismatch: declared {declared} bytes, read {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    /// The blob key cannot be mapped onto this backend.
    #[error("invalid blob key {0:?}")]
    InvalidKey(String),

    /// The backend is temporarily unreachable; the call may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other permanent backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Backend("lock poisoned".into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
