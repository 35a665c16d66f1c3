//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how each
//! variant is rendered to HTTP callers.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;
use visualize_core::ports::PortError;

/// Upper bound on an uploaded image, in bytes.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

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

    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid file type. Only JPEG, PNG, WebP, and GIF are allowed.")]
    InvalidFileType,

    #[error("Image must be less than 10MB")]
    PayloadTooLarge,

    #[error("Session not found or expired")]
    SessionNotFound,

    /// The session store failed and no in-memory copy could answer.
    #[error("Session store unavailable: {0}")]
    SessionStoreUnavailable(String),

    /// The vision service failed (unreachable, quota, rejected key).
    #[error("AI service error: {0}")]
    AiService(String),

    /// The vision service has no credentials configured.
    #[error("AI service not configured: {0}")]
    AiNotConfigured(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// Classifies a failure of the vision service.
    pub fn from_vision(e: PortError) -> Self {
        match e {
            PortError::Configuration(msg) => ApiError::AiNotConfigured(msg),
            other => ApiError::AiService(other.to_string()),
        }
    }

    /// Classifies a failure of a session lookup.
    pub fn from_session(e: PortError) -> Self {
        match e {
            PortError::NotFound(_) => ApiError::SessionNotFound,
            PortError::Unavailable(msg) => ApiError::SessionStoreUnavailable(msg),
            other => ApiError::Port(other),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidFileType => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::SessionNotFound | ApiError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::AiService(_)
            | ApiError::SessionStoreUnavailable(_)
            | ApiError::Port(PortError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable, machine-checkable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Invalid Request",
            ApiError::InvalidFileType => "Invalid file type",
            ApiError::PayloadTooLarge => "File too large",
            ApiError::SessionNotFound | ApiError::Port(PortError::NotFound(_)) => "Session Error",
            ApiError::SessionStoreUnavailable(_) => "Session Store Unavailable",
            ApiError::AiService(_) => "AI Service Error",
            ApiError::Config(_) | ApiError::AiNotConfigured(_) => "Configuration Error",
            _ => "Internal Server Error",
        }
    }

    /// Text shown to the caller. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Validation(_)
            | ApiError::InvalidFileType
            | ApiError::PayloadTooLarge
            | ApiError::SessionNotFound => self.to_string(),
            ApiError::Port(PortError::NotFound(msg)) => msg.clone(),
            ApiError::SessionStoreUnavailable(_) => {
                "Session storage is temporarily unavailable. Please try again.".to_string()
            }
            ApiError::AiService(_) => {
                "The AI service is temporarily unavailable. Please try again.".to_string()
            }
            ApiError::Config(_) | ApiError::AiNotConfigured(_) => {
                "The server is not properly configured. Please contact support.".to_string()
            }
            _ => "An unexpected error occurred".to_string(),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.reason().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_taxonomy() {
        assert_eq!(ApiError::Validation("Question is required".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidFileType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::SessionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AiService("quota".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::AiNotConfigured("key".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn vision_errors_split_configuration_from_outages() {
        assert!(matches!(
            ApiError::from_vision(PortError::Configuration("GEMINI_API_KEY".into())),
            ApiError::AiNotConfigured(_)
        ));
        assert!(matches!(
            ApiError::from_vision(PortError::Unavailable("503".into())),
            ApiError::AiService(_)
        ));
    }

    #[test]
    fn session_errors_split_missing_from_outages() {
        assert!(matches!(
            ApiError::from_session(PortError::NotFound("s".into())),
            ApiError::SessionNotFound
        ));
        assert_eq!(
            ApiError::from_session(PortError::Unavailable("db down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::Internal("pool exhausted at 10.0.0.3".into());
        assert_eq!(err.public_message(), "An unexpected error occurred");
        assert_eq!(err.reason(), "Internal Server Error");
    }
}
