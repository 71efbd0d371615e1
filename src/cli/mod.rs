//! CLI module for graphvault
//!
//! Provides the command-line interface over the durability stack:
//! backup creation and validation, restore and promotion, health
//! checks, audit queries and the foreground scheduler.

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{build_service, run, run_command, Service};
pub use errors::{CliError, CliErrorCode, CliResult};
