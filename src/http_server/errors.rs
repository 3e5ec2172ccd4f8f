//! # API Errors
//!
//! Every failure a handler can answer with. Each one renders as a CouchDB
//! error body `{"error": ..., "reason": ...}` with its HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::replication::ReplicationError;
use crate::store::StoreError;

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// API errors
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Unknown database, document or attachment
    #[error("not_found: {0}")]
    NotFound(String),

    /// Revision mismatch on write
    #[error("conflict: {0}")]
    Conflict(String),

    /// Duplicate database create
    #[error("file_exists: {0}")]
    AlreadyExists(String),

    /// Malformed request
    #[error("bad_request: {0}")]
    BadRequest(String),

    /// Database could not be created or opened
    #[error("precondition_failed: {0}")]
    PreconditionFailed(String),

    /// Session without credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Body type the route does not accept
    #[error("bad_content_type: {0}")]
    UnsupportedMediaType(String),

    // ==================
    // Translated Errors
    // ==================
    /// Engine or subsystem error with its own status and payload
    #[error("{error}: {reason}")]
    Translated {
        status: u16,
        error: String,
        reason: String,
    },

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Internal error
    #[error("internal_error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Translate a store error: its declared status wins over the route default
    pub fn from_store(err: StoreError, default_status: StatusCode) -> Self {
        ApiError::Translated {
            status: err.status.unwrap_or(default_status.as_u16()),
            error: err.error,
            reason: err.reason,
        }
    }

    /// Error with an explicit status and payload
    pub fn translated(status: StatusCode, error: &str, reason: &str) -> Self {
        ApiError::Translated {
            status: status.as_u16(),
            error: error.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::AlreadyExists(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Translated { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_name(&self) -> &str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::AlreadyExists(_) => "file_exists",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PreconditionFailed(_) => "precondition_failed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::UnsupportedMediaType(_) => "bad_content_type",
            ApiError::Translated { error, .. } => error,
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ApiError::NotFound(r)
            | ApiError::Conflict(r)
            | ApiError::AlreadyExists(r)
            | ApiError::BadRequest(r)
            | ApiError::PreconditionFailed(r)
            | ApiError::Unauthorized(r)
            | ApiError::UnsupportedMediaType(r)
            | ApiError::Internal(r) => r,
            ApiError::Translated { reason, .. } => reason,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Translated {
            status: err.status_code(),
            error: err.error_name().to_string(),
            reason: err.reason(),
        }
    }
}

impl From<ReplicationError> for ApiError {
    fn from(err: ReplicationError) -> Self {
        ApiError::Translated {
            status: err.status_code(),
            error: err.error_name().to_string(),
            reason: err.reason(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: String,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.error_name().to_string(),
            reason: err.reason().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
