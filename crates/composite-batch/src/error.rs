//! Error types for the compositing service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for compositing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Compositing service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed submission input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing credential or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote failure that survived every retry attempt
    #[error("Remote compositor unavailable: {0}")]
    TransientRemote(RemoteError),

    /// Remote rejection that is never retried
    #[error("Remote compositor rejected the request: {0}")]
    PermanentRemote(RemoteError),

    /// Failure fitting or persisting a single image
    #[error("Failed to process '{name}': {message}")]
    LocalIo { name: String, message: String },

    /// Session or chunk state that no longer exists
    #[error("Not found: {0}")]
    ResourceMissing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a local IO error scoped to one image
    pub fn local_io(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LocalIo {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn missing(message: impl Into<String>) -> Self {
        Self::ResourceMissing(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        if err.is_retryable() {
            Error::TransientRemote(err)
        } else {
            Error::PermanentRemote(err)
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::Config(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone())
            }
            Error::TransientRemote(err) => {
                (StatusCode::BAD_GATEWAY, "remote_unavailable", err.to_string())
            }
            Error::PermanentRemote(err) => {
                (StatusCode::BAD_GATEWAY, "remote_rejected", err.to_string())
            }
            Error::LocalIo { name, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "local_io_error",
                format!("Failed to process '{}': {}", name, message),
            ),
            Error::ResourceMissing(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Image(err) => (StatusCode::BAD_REQUEST, "image_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Zip(err) => (StatusCode::INTERNAL_SERVER_ERROR, "archive_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
