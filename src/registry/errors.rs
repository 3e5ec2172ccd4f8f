//! # Registry Errors

use thiserror::Error;

use crate::store::StoreError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Name absent from both the mapping and the store catalog
    #[error("Database does not exist: {0}")]
    NotFound(String),

    /// Name already registered or present in the catalog
    #[error("Database already exists: {0}")]
    AlreadyExists(String),

    /// Name rejected before reaching the store
    #[error("Illegal database name: {0}")]
    IllegalName(String),

    /// The store failed to open the database
    #[error("Failed to open database {name}: {source}")]
    OpenFailed { name: String, source: StoreError },

    /// Catalog or destroy failure reported by the store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// HTTP status the error is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::NotFound(_) => 404,
            RegistryError::AlreadyExists(_) => 412,
            RegistryError::IllegalName(_) => 400,
            RegistryError::OpenFailed { .. } => 412,
            RegistryError::Store(err) => err.status.unwrap_or(500),
            RegistryError::Internal(_) => 500,
        }
    }

    /// CouchDB `error` field
    pub fn error_name(&self) -> &str {
        match self {
            RegistryError::NotFound(_) => "not_found",
            RegistryError::AlreadyExists(_) => "file_exists",
            RegistryError::IllegalName(_) => "illegal_database_name",
            RegistryError::OpenFailed { source, .. } => &source.error,
            RegistryError::Store(err) => &err.error,
            RegistryError::Internal(_) => "internal_error",
        }
    }

    /// CouchDB `reason` field
    pub fn reason(&self) -> String {
        match self {
            RegistryError::NotFound(_) => "no_db_file".to_string(),
            RegistryError::AlreadyExists(_) => {
                "The database could not be created, the file already exists.".to_string()
            }
            RegistryError::IllegalName(name) => format!(
                "Name: '{}'. Only lowercase characters (a-z), digits (0-9), and any of the \
                 characters _, $, (, ), +, -, and / are allowed. Must begin with a letter.",
                name
            ),
            RegistryError::OpenFailed { source, .. } => source.reason.clone(),
            RegistryError::Store(err) => err.reason.clone(),
            RegistryError::Internal(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RegistryError::NotFound("a".into()).status_code(), 404);
        assert_eq!(RegistryError::AlreadyExists("a".into()).status_code(), 412);
        assert_eq!(RegistryError::IllegalName("A".into()).status_code(), 400);
        let failed = RegistryError::OpenFailed {
            name: "a".into(),
            source: StoreError::internal("disk"),
        };
        assert_eq!(failed.status_code(), 412);
        assert_eq!(failed.error_name(), "internal_error");
    }

    #[test]
    fn test_store_error_keeps_declared_status() {
        let err = RegistryError::from(StoreError::not_found("missing"));
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.reason(), "missing");
        assert_eq!(RegistryError::from(StoreError::internal("x")).status_code(), 500);
    }
}
