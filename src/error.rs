//! Error types for fediwiki
//!
//! Module errors are classified into an [`ErrorCategory`] and converted to
//! `AppError` at the HTTP boundary, which implements `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::federation::{AuthError, InboxError, WebFingerError};
use crate::pages::PageError;

/// Coarse classification of a failure, independent of transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request content is unusable (400)
    MalformedInput,
    /// Request could not be authenticated (400)
    AuthFailure,
    /// Referenced local resource does not exist (404)
    NotFound,
    /// A remote server could not be reached (500)
    TransientNetwork,
    /// Anything else (500)
    Internal,
}

impl ErrorCategory {
    pub fn status(self) -> StatusCode {
        match self {
            Self::MalformedInput | Self::AuthFailure => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TransientNetwork | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-wide error type
///
/// Every variant maps to one HTTP status and a JSON `{"error": ...}` body.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signature verification failed (400)
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] AuthError),

    /// Record store error (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote server unreachable or misbehaving (500)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Not implemented (501)
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<InboxError> for AppError {
    fn from(err: InboxError) -> Self {
        let message = err.to_string();
        match err.category() {
            ErrorCategory::MalformedInput => AppError::Validation(message),
            ErrorCategory::AuthFailure => AppError::Validation(message),
            ErrorCategory::NotFound => AppError::NotFound(message),
            ErrorCategory::TransientNetwork => AppError::Federation(message),
            ErrorCategory::Internal => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::NotFound(page) | PageError::InvalidName(page) => {
                AppError::NotFound(format!("page {page}"))
            }
            PageError::Store(e) => AppError::Storage(e.to_string()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<WebFingerError> for AppError {
    fn from(err: WebFingerError) -> Self {
        match err {
            WebFingerError::ForeignDomain(_) => AppError::NotFound(err.to_string()),
            WebFingerError::MissingResource | WebFingerError::InvalidResource(_) => {
                AppError::Validation(err.to_string())
            }
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Storage(_)
            | AppError::Federation(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Internal details are logged, not returned to the client.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let (error_message, error_type) = match &self {
            AppError::NotFound(msg) => (msg.clone(), "not_found"),
            AppError::Validation(msg) => (msg.clone(), "validation"),
            AppError::InvalidSignature(_) => (self.to_string(), "invalid_signature"),
            AppError::NotImplemented(msg) => (msg.clone(), "not_implemented"),
            AppError::Federation(msg) => (msg.clone(), "federation"),
            AppError::Storage(_) => ("Storage error".to_string(), "storage"),
            AppError::Config(msg) => (msg.clone(), "config"),
            AppError::Internal(_) => ("Internal server error".to_string(), "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
