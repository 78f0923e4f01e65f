//! Model error types.

use thiserror::Error;

/// Errors raised while building or validating a document.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("unknown state: {name}")]
    UnknownState { name: String },

    #[error("duplicate state name: {name}")]
    DuplicateState { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ModelError::InvalidDocument {
            reason: reason.into(),
        }
    }

    /// Returns an error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelError::InvalidDocument { .. } => "INVALID_DOCUMENT",
            ModelError::UnknownState { .. } => "UNKNOWN_STATE",
            ModelError::DuplicateState { .. } => "DUPLICATE_STATE",
            ModelError::Json(_) => "BAD_REQUEST",
        }
    }
}
