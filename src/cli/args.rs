//! CLI argument definitions using clap
//!
//! Commands:
//! - livequery start --config <path> [--port <port>] [--log-level <level>]
//! - livequery validate --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// livequery - push record changes to subscribed WebSocket clients
#[derive(Parser, Debug)]
#[command(name = "livequery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the live query server
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./livequery.json")]
        config: PathBuf,

        /// Overrides `port` from the configuration file
        #[arg(long)]
        port: Option<u16>,

        /// Overrides `log_level` from the configuration file
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Load and validate a configuration file, then print it
    Validate {
        /// Path to configuration file
        #[arg(long, default_value = "./livequery.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
