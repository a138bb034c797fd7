//! services/api/src/error.rs
//!
//! Defines the primary error type for the API service and the mapping from
//! port errors to HTTP responses.

use crate::config::ConfigError;
use axum::{http::StatusCode, Json};
use serde::Serialize;
use study_tracker_core::PortError;
use tracing::{error, warn};
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying database migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

//=========================================================================================
// HTTP Error Responses
//=========================================================================================

/// JSON body returned with every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// The error half of every handler's return type.
pub type HandlerError = (StatusCode, Json<ErrorBody>);

pub fn failure(status: StatusCode, code: &'static str, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: message.into(),
        }),
    )
}

/// Maps a port error to a response, logging server-side failures.
pub fn port_failure(context: &str, e: PortError) -> HandlerError {
    let (status, code) = match &e {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        PortError::NotAssigned { .. } => (StatusCode::FORBIDDEN, "NOT_ASSIGNED"),
        PortError::AlreadyAssigned { .. } => (StatusCode::CONFLICT, "ALREADY_ASSIGNED"),
        PortError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        PortError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        PortError::RaceLost => (StatusCode::CONFLICT, "RACE_LOST"),
        PortError::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
        PortError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if status.is_server_error() {
        error!(error = %e, "{}", context);
    } else {
        warn!(error = %e, "{}", context);
    }

    let message = match &e {
        // Internal details stay in the logs.
        PortError::Unexpected(_) => context.to_string(),
        _ => e.to_string(),
    };
    failure(status, code, message)
}
