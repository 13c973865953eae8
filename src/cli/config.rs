//! Configuration file
//!
//! ```json
//! {
//!   "app_id": "myApp",
//!   "master_key": "secret",
//!   "server_url": "http://localhost:1337/parse",
//!   "redis_uri": "redis://127.0.0.1:6379",
//!   "port": 8080
//! }
//! ```
//!
//! Only `app_id` is required. Without `redis_uri`, changes arrive through
//! the HTTP ingest endpoints only.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::auth::DEFAULT_CACHE_CAPACITY;
use crate::http_server::config::{default_host, default_port, default_websocket_path};
use crate::http_server::HttpServerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Application id clients present on `connect` (required)
    pub app_id: String,

    /// Grants ACL bypass on `connect`; required on ingest requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,

    /// Base URL of the session lookup service
    #[serde(default)]
    pub server_url: Option<String>,

    /// Redis server publishing `<app_id>afterSave`/`<app_id>afterDelete`
    #[serde(default)]
    pub redis_uri: Option<String>,

    /// IP address to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket upgrade path (default: "/parse")
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,

    /// Identity cache capacity (default: 10000)
    #[serde(default = "default_identity_cache_capacity")]
    pub identity_cache_capacity: usize,

    /// Identity lookup timeout in milliseconds (default: 5000)
    #[serde(default = "default_identity_timeout_ms")]
    pub identity_timeout_ms: u64,

    /// Change feed workers (default: 2)
    #[serde(default = "default_feed_workers")]
    pub feed_workers: usize,

    /// Default log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_identity_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}
fn default_identity_timeout_ms() -> u64 {
    5000
}
fn default_feed_workers() -> usize {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Apply command-line overrides, then validate again
    pub fn with_overrides(mut self, port: Option<u16>, log_level: Option<String>) -> CliResult<Self> {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(CliError::config_error("app_id must not be empty"));
        }

        if self.identity_cache_capacity == 0 {
            return Err(CliError::config_error("identity_cache_capacity must be > 0"));
        }

        if self.identity_timeout_ms == 0 {
            return Err(CliError::config_error("identity_timeout_ms must be > 0"));
        }

        if self.feed_workers == 0 {
            return Err(CliError::config_error("feed_workers must be > 0"));
        }

        self.http_config().validate().map_err(CliError::config_error)?;

        if let Some(uri) = &self.redis_uri {
            redis::Client::open(uri.as_str())
                .map_err(|e| CliError::config_error(format!("Invalid redis_uri '{}': {}", uri, e)))?;
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(CliError::config_error(format!(
                "Invalid log_level: '{}'. Expected one of {}.",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub fn http_config(&self) -> HttpServerConfig {
        HttpServerConfig {
            host: self.host.clone(),
            port: self.port,
            websocket_path: self.websocket_path.clone(),
        }
    }
}
