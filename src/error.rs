//! Error types for bulk-process runs.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BulkProcessError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Operation already registered: {0}")]
    DuplicateOperation(String),
    #[error("Operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),
    #[error("Run {run_id} is not active (status: {status})")]
    RunNotActive { run_id: Uuid, status: String },
    #[error("Operation '{action}' already has an active run: {run_id}")]
    RunConflict { action: String, run_id: Uuid },
    #[error("Run {run_id} belongs to operation '{expected}', not '{actual}'")]
    ActionMismatch {
        run_id: Uuid,
        expected: String,
        actual: String,
    },
    #[error("Offset {requested} does not match run position {expected}")]
    OffsetMismatch { requested: u64, expected: u64 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid or expired security token")]
    InvalidToken,
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Rendering error: {0}")]
    RenderError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BulkProcessError {
    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigurationError> for BulkProcessError {
    fn from(error: ConfigurationError) -> Self {
        BulkProcessError::ConfigurationError(error.to_string())
    }
}

impl From<askama::Error> for BulkProcessError {
    fn from(error: askama::Error) -> Self {
        BulkProcessError::RenderError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BulkProcessError>;
