//! Error types for task-relay
//!
//! This module provides error handling for the whole pipeline:
//! - The top-level [`Error`] used by every service and collaborator trait
//! - Domain-specific errors for persistence ([`DatabaseError`]) and outbound
//!   HTTP dispatch ([`DispatchError`])
//! - HTTP status code mapping and structured JSON bodies for the API

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for task-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for task-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "requester.workers")
        key: Option<String>,
    },

    /// A submitted task failed validation before being persisted
    #[error("validation error: {0}")]
    Validation(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Queue transport failed (publish, subscribe or close)
    #[error("queue error: {0}")]
    Queue(String),

    /// Outbound HTTP dispatch failed
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The worker pool had no free slot for the task
    #[error("task rejected: all {workers} workers are busy")]
    Rejected {
        /// Size of the pool that refused the task
        workers: usize,
    },

    /// Task not found
    #[error("task not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// One or more handles failed to close during shutdown
    #[error("failed to close: {}", join_errors(.0))]
    Close(Vec<Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry or encoder error
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate task id)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A stored value could not be decoded
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Outbound HTTP dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request could not be built from the task (bad URL, header name or value)
    #[error("invalid request for task {task_id}: {reason}")]
    InvalidRequest {
        /// Task whose request could not be built
        task_id: String,
        /// Why the request could not be built
        reason: String,
    },

    /// Every attempt failed before a response was received
    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Number of attempts made
        attempts: u32,
        /// The error of the last attempt
        #[source]
        source: reqwest::Error,
    },

    /// A response arrived but its body could not be read
    #[error("failed to read response body: {0}")]
    BodyRead(#[source] reqwest::Error),
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "task not found: 0b5c...",
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation(_) => 400,
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - Duplicate task id
            Error::Database(DatabaseError::ConstraintViolation(_)) => 409,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Metrics(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Close(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Dispatch(_) => 502,
            Error::Queue(_) => 502,

            // 503 Service Unavailable
            Error::Rejected { .. } => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Database(DatabaseError::ConstraintViolation(_)) => "conflict",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Queue(_) => "queue_error",
            Error::Dispatch(e) => match e {
                DispatchError::InvalidRequest { .. } => "invalid_request",
                DispatchError::Transport { .. } => "transport_error",
                DispatchError::BodyRead(_) => "body_read_error",
            },
            Error::Rejected { .. } => "rejected",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Close(_) => "close_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Metrics(_) => "metrics_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Rejected { workers } => Some(serde_json::json!({ "workers": workers })),
            Error::Dispatch(DispatchError::Transport { attempts, .. }) => {
                Some(serde_json::json!({ "attempts": attempts }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
