//! # Client Error Types

use thiserror::Error;

use crate::driver::state::{DriverEvent, DriverState};

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors talking to a bulk-process server
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("API error: {status} {code} - {message}")]
    ApiError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Timeout waiting for operation: {operation}")]
    Timeout { operation: String },

    #[error("Invalid response: {field} - {reason}")]
    InvalidResponse { field: String, reason: String },
}

impl ClientError {
    pub fn api_error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn invalid_response(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is recoverable (worth retrying)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::HttpError(e) => e.is_timeout() || e.is_connect(),
            ClientError::Timeout { .. } => true,
            // 408: the server timed the request out, the invocation itself still ran
            ClientError::ApiError { status, .. } => *status == 408 || *status >= 500,
            ClientError::InvalidResponse { .. } => false,
            _ => false,
        }
    }

    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::ApiError { status, .. } => Some(*status),
            ClientError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors ending a driven run
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Invalid driver transition: {event:?} in state {from}")]
    InvalidTransition {
        from: DriverState,
        event: DriverEvent,
    },

    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("Iteration limit of {limit} reached at position {position}")]
    IterationLimit { limit: u64, position: u64 },

    #[error("Run aborted at position {position}")]
    Aborted { position: u64 },

    #[error("Protocol violation: {0}")]
    Protocol(String),
}
