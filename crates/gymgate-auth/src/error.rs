//! Subsystem error handling
//!
//! Authentication failures always surface a generic message to the caller;
//! the specific reason is recorded through the security-event sink instead.
//! Authorization failures disclose the missing requirements, since the
//! caller is already identified.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::repository::RepositoryError;

/// Generic message for any credential failure (enumeration resistance).
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
/// The one deliberate disclosure: locked accounts say so, to aid
/// legitimate users.
pub const ACCOUNT_LOCKED: &str = "Account is temporarily locked";
/// Generic message for any refresh failure.
pub const REFRESH_FAILED: &str = "Failed to refresh token";

/// JSON error body returned by the HTTP boundary
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_permissions: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            required: None,
            user_permissions: None,
        }
    }
}

/// Application error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad input shape; surfaced with the specific reason
    #[error("{0}")]
    Validation(String),

    /// Bad credentials, locked account, invalid token; the message is
    /// already generic by construction
    #[error("{0}")]
    Authentication(String),

    /// Insufficient role/permission; surfaced with the missing detail
    #[error("{message}")]
    Authorization {
        message: String,
        required: Vec<String>,
        user_permissions: Vec<String>,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// Store errors from the primary operation; detail is logged, not
    /// returned
    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn authentication(message: impl Into<String>) -> Self {
        AuthError::Authentication(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AuthError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("VALIDATION_ERROR", msg),
            ),
            AuthError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorBody::new("UNAUTHORIZED", msg))
            }
            AuthError::Authorization {
                message,
                required,
                user_permissions,
            } => {
                let mut body = ErrorBody::new("FORBIDDEN", message);
                body.required = Some(required);
                body.user_permissions = Some(user_permissions);
                (StatusCode::FORBIDDEN, body)
            }
            AuthError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new("NOT_FOUND", format!("{resource} not found")),
            ),
            AuthError::Database(detail) => {
                tracing::error!(detail = %detail, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("INTERNAL_ERROR", "Internal server error"),
                )
            }
            AuthError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("INTERNAL_ERROR", "Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UserNotFound => AuthError::NotFound("User".to_string()),
            RepositoryError::SessionNotFound => AuthError::NotFound("Session".to_string()),
            RepositoryError::DuplicateUser => {
                AuthError::Validation("Username or email already exists".to_string())
            }
            RepositoryError::Database(msg) => AuthError::Database(msg),
        }
    }
}
