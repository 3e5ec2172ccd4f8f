//! CLI argument definitions using clap
//!
//! Commands:
//! - couchgate serve --config <path> [--port <port>]
//! - couchgate check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// couchgate - a CouchDB-compatible HTTP gateway
#[derive(Parser, Debug)]
#[command(name = "couchgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Path to configuration file; a missing file means defaults
        #[arg(long, default_value = "./couchgate.json")]
        config: PathBuf,

        /// Port to listen on, overriding the configuration file
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Load and validate a configuration file, then print it
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./couchgate.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_port_override() {
        let cli = Cli::parse_from(["couchgate", "serve", "--port", "6000"]);
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, PathBuf::from("./couchgate.json"));
                assert_eq!(port, Some(6000));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_check_config_path() {
        let cli = Cli::parse_from(["couchgate", "check-config", "--config", "/etc/couchgate.json"]);
        assert!(matches!(cli.command, Command::CheckConfig { .. }));
    }
}
