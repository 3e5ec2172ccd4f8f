//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit code.

use std::io;

use thiserror::Error;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    ConfigError,
    IoError,
    BootFailed,
    ServeFailed,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "COUCHGATE_CONFIG_ERROR",
            Self::IoError => "COUCHGATE_IO_ERROR",
            Self::BootFailed => "COUCHGATE_BOOT_FAILED",
            Self::ServeFailed => "COUCHGATE_SERVE_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    /// Unreadable, malformed or out-of-range configuration
    #[error("COUCHGATE_CONFIG_ERROR: {0}")]
    Config(String),

    #[error("COUCHGATE_IO_ERROR: {0}")]
    Io(#[from] io::Error),

    /// Logging or the runtime could not start
    #[error("COUCHGATE_BOOT_FAILED: {0}")]
    Boot(String),

    /// The server stopped with an error
    #[error("COUCHGATE_SERVE_FAILED: {0}")]
    Serve(String),
}

impl CliError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        CliError::Boot(msg.into())
    }

    pub fn serve_failed(msg: impl Into<String>) -> Self {
        CliError::Serve(msg.into())
    }

    pub fn code(&self) -> CliErrorCode {
        match self {
            CliError::Config(_) => CliErrorCode::ConfigError,
            CliError::Io(_) => CliErrorCode::IoError,
            CliError::Boot(_) => CliErrorCode::BootFailed,
            CliError::Serve(_) => CliErrorCode::ServeFailed,
        }
    }

    /// Message without the code prefix
    pub fn message(&self) -> String {
        match self {
            CliError::Config(msg) | CliError::Boot(msg) | CliError::Serve(msg) => msg.clone(),
            CliError::Io(err) => err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::config_error("port must be > 0");
        assert_eq!(err.to_string(), "COUCHGATE_CONFIG_ERROR: port must be > 0");
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }

    #[test]
    fn test_io_conversion() {
        let err: CliError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code().code(), "COUCHGATE_IO_ERROR");
        assert_eq!(err.message(), "gone");
    }
}
