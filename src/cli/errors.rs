//! CLI errors
//!
//! Every CLI error is fatal. Each category carries a stable string code for
//! log scraping and a sysexits-style process exit status.

use std::fmt;
use std::io;

/// Failure category of a CLI command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file missing, unparsable or invalid
    ConfigError,
    /// Writing command output failed
    IoError,
    /// Runtime or listener could not start, or the server stopped with an
    /// error
    BootFailed,
}

impl CliErrorCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::ConfigError => "LQ_CLI_CONFIG_ERROR",
            Self::IoError => "LQ_CLI_IO_ERROR",
            Self::BootFailed => "LQ_CLI_BOOT_FAILED",
        }
    }

    /// Process exit status (EX_CONFIG, EX_IOERR, EX_SOFTWARE)
    pub fn exit_status(self) -> i32 {
        match self {
            Self::ConfigError => 78,
            Self::IoError => 74,
            Self::BootFailed => 70,
        }
    }
}

/// Error returned by CLI commands
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_status(&self) -> i32 {
        self.code.exit_status()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

pub type CliResult<T> = Result<T, CliError>;
