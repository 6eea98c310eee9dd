//! Error types shared by both services

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for docpulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Platform errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client sent something malformed
    #[error("{0}")]
    Validation(String),

    /// Upload carried no file payload
    #[error("No file provided in the 'file' field")]
    MissingFile,

    /// Media type outside the allowlist; message carries the allowed list
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Upload exceeds the configured size cap
    #[error("Payload exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Missing or unusable credentials
    #[error("Authentication required")]
    Unauthorized,

    /// Caller has no claim on the referent
    #[error("You do not have access to this resource")]
    Ownership,

    /// Referent missing
    #[error("{0}")]
    NotFound(String),

    /// Object storage failed; no database rows exist for the upload
    #[error("Object storage error: {0}")]
    Storage(String),

    /// Database write or read failed
    #[error("Database error: {0}")]
    Database(String),

    /// Event channel failure
    #[error("Event channel error: {0}")]
    Bus(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine slug used in the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Validation(_) => "validation_error",
            Error::MissingFile => "missing_file",
            Error::UnsupportedMediaType(_) => "unsupported_media_type",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Unauthorized => "unauthorized",
            Error::Ownership => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) => "bad_gateway",
            Error::Database(_) => "internal",
            Error::Bus(_) => "internal",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(_) | Error::MissingFile => StatusCode::BAD_REQUEST,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Ownership => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Storage(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Bus(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Bus(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {err}"))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Persistence and channel causes stay in the logs; clients get a
        // stable message that does not leak internals.
        let message = match &self {
            Error::Database(detail) | Error::Bus(detail) | Error::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "statusCode": status.as_u16(),
            "message": message,
            "error": self.kind(),
        }));

        (status, body).into_response()
    }
}
