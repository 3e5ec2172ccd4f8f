//! # Store Errors
//!
//! Errors raised by a document store engine. They carry the CouchDB
//! `error`/`reason` pair and, when the engine knows it, the HTTP status the
//! error should be reported with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// An error reported by the document store
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error}: {reason}")]
pub struct StoreError {
    /// Status declared by the engine, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Short machine-readable name (`not_found`, `conflict`, ...)
    pub error: String,

    /// Human-readable reason
    pub reason: String,
}

impl StoreError {
    pub fn new(status: Option<u16>, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            reason: reason.into(),
        }
    }

    /// Unknown database, document or attachment
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(Some(404), "not_found", reason)
    }

    /// Revision mismatch on write
    pub fn conflict() -> Self {
        Self::new(Some(409), "conflict", "Document update conflict.")
    }

    /// Malformed input detected by the engine
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(Some(400), "bad_request", reason)
    }

    /// Database already present in the catalog
    pub fn file_exists() -> Self {
        Self::new(
            Some(412),
            "file_exists",
            "The database could not be created, the file already exists.",
        )
    }

    /// Engine failure without a declared status
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(None, "internal_error", reason)
    }

    /// True when the engine reported the error as a 404
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}
