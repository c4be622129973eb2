//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as a JSON error payload.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use profiler_core::ports::PortError;
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

    /// Represents an error while running the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request itself is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The route needs a signed-in user.
    #[error("Authentication required")]
    AuthRequired,

    /// Wrong e-mail or password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Free-tier or balance check refused the request.
    #[error("{0}")]
    TokenLimit(String),

    /// The caller may not perform this action.
    #[error("{0}")]
    Forbidden(String),

    /// Anonymous session has spent its allowance and can no longer upload.
    #[error("{0}")]
    UploadNotPermitted(String),

    /// An owner-scoped lookup found nothing.
    #[error("{0} not found")]
    NotFound(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::AuthRequired => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED"),
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            ApiError::TokenLimit(_) => (StatusCode::PAYMENT_REQUIRED, "TOKEN_LIMIT_EXCEEDED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::UploadNotPermitted(_) => (StatusCode::FORBIDDEN, "UPLOAD_NOT_PERMITTED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Port(PortError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Port(PortError::Unauthorized) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Port(PortError::NotConfigured(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_NOT_CONFIGURED")
            }
            ApiError::Port(PortError::Provider(_)) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            ApiError::Port(PortError::InvalidResponse(_)) => {
                (StatusCode::BAD_GATEWAY, "INVALID_PROVIDER_RESPONSE")
            }
            ApiError::Port(PortError::Unexpected(_))
            | ApiError::Config(_)
            | ApiError::Database(_)
            | ApiError::Migration(_)
            | ApiError::Io(_)
            | ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the log, not in the payload.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {}", self);
            "An unexpected internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = match self {
            ApiError::TokenLimit(_) | ApiError::UploadNotPermitted(_) => json!({
                "error": message,
                "code": code,
                "upgrade_required": true,
            }),
            _ => json!({ "error": message, "code": code }),
        };

        (status, Json(body)).into_response()
    }
}
