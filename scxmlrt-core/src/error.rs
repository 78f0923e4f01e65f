//! Core error types.
//!
//! Runtime failures inside executable content never surface here: they are
//! turned into `error.execution` / `error.communication` events. What remains
//! are misuse of the interpreter and malformed documents.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors from the interpretation engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] scxmlrt_model::ModelError),

    #[error("interpreter already started")]
    AlreadyStarted,

    #[error("interpreter not started")]
    NotStarted,

    #[error("data model '{model}' does not support {operation}")]
    UnsupportedOperation { operation: String, model: String },

    #[error("more than {limit} microsteps without reaching a stable configuration")]
    MicrostepLimit { limit: usize },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session task failed: {0}")]
    Session(String),
}

impl CoreError {
    /// Returns whether the interpreter stops after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::UnsupportedOperation { .. } | CoreError::MicrostepLimit { .. }
        )
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDocument(_) => "INVALID_DOCUMENT",
            CoreError::AlreadyStarted => "ALREADY_STARTED",
            CoreError::NotStarted => "NOT_STARTED",
            CoreError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            CoreError::MicrostepLimit { .. } => "MICROSTEP_LIMIT",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
            CoreError::Session(_) => "SESSION_ERROR",
        }
    }
}

/// Errors reported by a data model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataModelError {
    /// A runtime value error; becomes `error.execution`.
    #[error("{0}")]
    Execution(String),

    /// An operation the data model cannot perform at all.
    #[error("data model '{model}' does not support {operation}")]
    Unsupported {
        operation: &'static str,
        model: &'static str,
    },
}

impl DataModelError {
    pub fn execution(msg: impl Into<String>) -> Self {
        DataModelError::Execution(msg.into())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, DataModelError::Execution(_))
    }
}

impl From<DataModelError> for CoreError {
    fn from(e: DataModelError) -> Self {
        match e {
            DataModelError::Unsupported { operation, model } => CoreError::UnsupportedOperation {
                operation: operation.to_string(),
                model: model.to_string(),
            },
            // Callers route recoverable errors to error events; reaching this
            // arm means one slipped through.
            DataModelError::Execution(msg) => CoreError::UnsupportedOperation {
                operation: format!("unhandled execution error: {}", msg),
                model: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err: CoreError = DataModelError::Unsupported {
            operation: "assign",
            model: "null",
        }
        .into();
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "UNSUPPORTED_OPERATION");
        assert_eq!(err.to_string(), "data model 'null' does not support assign");

        assert!(!CoreError::AlreadyStarted.is_fatal());
    }

    #[test]
    fn test_recoverable() {
        assert!(DataModelError::execution("x is undefined").is_recoverable());
        assert!(!DataModelError::Unsupported {
            operation: "foreach",
            model: "null"
        }
        .is_recoverable());
    }
}
