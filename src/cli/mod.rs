//! CLI module for couchgate
//!
//! Provides command-line interface for:
//! - serve: load configuration, install logging and run the gateway
//! - check-config: validate a configuration file

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, serve, Config};
pub use errors::{CliError, CliErrorCode, CliResult};
