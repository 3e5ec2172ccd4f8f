//! CLI command implementations

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::http_server::{GatewayConfig, HttpServer};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from file; a missing file means defaults
    pub fn load(path: &Path) -> CliResult<Self> {
        let config = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(CliError::config_error(format!("Failed to read config: {}", e)))
            }
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        self.gateway.validate().map_err(CliError::config_error)
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Install the global tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &GatewayConfig) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| CliError::config_error(format!("Invalid log_level: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CliError::boot_failed(format!("Failed to install logger: {}", e)))
}

/// Start the gateway and serve until interrupted
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.gateway.port = port;
        config.validate()?;
    }

    init_logging(&config.gateway)?;
    info!(config = %config_path.display(), "Configuration loaded");

    let server = HttpServer::with_config(config.gateway);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::serve_failed(format!("HTTP server failed: {}", e)))
    })?;

    Ok(())
}

/// Validate a configuration file and print the effective settings
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_config(temp_dir: &TempDir, value: serde_json::Value) -> std::path::PathBuf {
        let config_path = temp_dir.path().join("couchgate.json");
        fs::write(&config_path, value.to_string()).unwrap();
        config_path
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_reads_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            json!({ "port": 6001, "heartbeat_ms": 250, "cors_origins": ["http://app"] }),
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.port, 6001);
        assert_eq!(config.gateway.heartbeat_ms, 250);
        assert_eq!(config.gateway.cors_origins, vec!["http://app".to_string()]);
        assert_eq!(config.gateway.host, "0.0.0.0");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("couchgate.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }

    #[test]
    fn test_config_validates_log_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, json!({ "log_format": "xml" }));
        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
        assert!(err.message().contains("log_format"));
    }

    #[test]
    fn test_check_config_accepts_valid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, json!({ "port": 5985 }));
        assert!(check_config(&path).is_ok());
    }

    #[test]
    fn test_serve_rejects_zero_port_override() {
        let temp_dir = TempDir::new().unwrap();
        let err = serve(&temp_dir.path().join("absent.json"), Some(0)).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }
}
