use thiserror::Error;

/// Errors produced by type parsing and field validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown file type: {0}")]
    UnknownFileType(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl TypeError {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
