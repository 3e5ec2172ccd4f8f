//! # Replication Errors

use thiserror::Error;

use crate::registry::RegistryError;
use crate::store::StoreError;

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Replication errors
#[derive(Debug, Clone, Error)]
pub enum ReplicationError {
    // ==================
    // Request Errors
    // ==================
    /// Malformed replication request
    #[error("Invalid replication request: {0}")]
    InvalidRequest(String),

    /// Local endpoint is not a known database
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// No continuous replication matches a cancel request
    #[error("Replication task not found: {0}")]
    TaskNotFound(String),

    // ==================
    // Endpoint Errors
    // ==================
    /// An endpoint answered with an error
    #[error("Endpoint {endpoint} failed: {source}")]
    Endpoint { endpoint: String, source: StoreError },

    /// Transport failure talking to a remote endpoint
    #[error("Remote request to {endpoint} failed: {message}")]
    Remote { endpoint: String, message: String },

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    pub fn endpoint(endpoint: &str, source: StoreError) -> Self {
        ReplicationError::Endpoint {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub fn remote(endpoint: &str, err: impl std::fmt::Display) -> Self {
        ReplicationError::Remote {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }

    /// Map a registry failure for endpoint `name`
    pub fn from_registry(name: &str, err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ReplicationError::DatabaseNotFound(name.to_string()),
            other => ReplicationError::endpoint(
                name,
                StoreError::new(Some(other.status_code()), other.error_name(), other.reason()),
            ),
        }
    }

    /// Synchronous replication failures are bad requests; only a cancel
    /// of an unknown task is a 404
    pub fn status_code(&self) -> u16 {
        match self {
            ReplicationError::TaskNotFound(_) => 404,
            ReplicationError::Internal(_) => 500,
            _ => 400,
        }
    }

    /// CouchDB `error` field
    pub fn error_name(&self) -> &str {
        match self {
            ReplicationError::TaskNotFound(_) => "not_found",
            ReplicationError::DatabaseNotFound(_) => "db_not_found",
            ReplicationError::Endpoint { source, .. } => &source.error,
            ReplicationError::Internal(_) => "internal_error",
            _ => "bad_request",
        }
    }

    /// CouchDB `reason` field
    pub fn reason(&self) -> String {
        match self {
            ReplicationError::DatabaseNotFound(name) => format!("could not open {}", name),
            ReplicationError::Endpoint { source, .. } => source.reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_bad_requests() {
        assert_eq!(ReplicationError::DatabaseNotFound("a".into()).status_code(), 400);
        assert_eq!(
            ReplicationError::endpoint("a", StoreError::conflict()).status_code(),
            400
        );
        assert_eq!(ReplicationError::TaskNotFound("x".into()).status_code(), 404);
    }

    #[test]
    fn test_endpoint_error_keeps_engine_payload() {
        let err = ReplicationError::endpoint("http://h/db", StoreError::new(Some(401), "unauthorized", "Name or password is incorrect."));
        assert_eq!(err.error_name(), "unauthorized");
        assert_eq!(err.reason(), "Name or password is incorrect.");
    }

    #[test]
    fn test_from_registry() {
        let err = ReplicationError::from_registry("db", RegistryError::NotFound("db".into()));
        assert!(matches!(err, ReplicationError::DatabaseNotFound(_)));
        assert_eq!(err.reason(), "could not open db");
    }
}
