//! CLI module for livequery
//!
//! Provides command-line interface for:
//! - start: Load configuration and serve live queries
//! - validate: Check a configuration file and print it

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{build_server, run, run_command, start, validate};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_json;
