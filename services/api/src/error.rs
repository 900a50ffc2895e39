//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its
//! mapping onto HTTP responses.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use readalong_core::ports::PortError;
use serde_json::json;
use tracing::error;

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

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status for this error, and a stable machine-readable code
    /// the client can branch on (notably `config_missing`, which prompts
    /// the user to finish provider setup).
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Port(PortError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Port(PortError::PermissionDenied) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Port(PortError::ConfigMissing(_)) => {
                (StatusCode::BAD_REQUEST, "config_missing")
            }
            ApiError::Port(PortError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Port(PortError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Port(PortError::Transient(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "transient")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {:?}", self);
        }
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
