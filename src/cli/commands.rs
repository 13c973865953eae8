//! CLI command implementations
//!
//! `start` wires the subsystems together in this order:
//! 1. Configuration load and overrides
//! 2. Tracing
//! 3. Identity resolution (remote session lookup, or none)
//! 4. Registry, dispatcher and change feed workers
//! 5. Redis change subscriber, when configured
//! 6. HTTP server

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::write_json;
use crate::auth::{IdentityCache, IdentityResolver, ParseSessionResolver, StaticIdentityResolver};
use crate::http_server::{HttpServer, LiveQueryState};
use crate::observability::{init_tracing, LiveQueryMetrics};
use crate::realtime::{
    ChangeFeed, Dispatcher, LiveQueryHub, RedisChangeSource, SubscriptionRegistry,
};

/// Bound on change events waiting for a feed worker
const FEED_QUEUE_CAPACITY: usize = 1024;

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
        Command::Start {
            config,
            port,
            log_level,
        } => start(&config, port, log_level),
        Command::Validate { config } => validate(&config),
    }
}

/// Start the live query server and serve until the process stops
pub fn start(config_path: &Path, port: Option<u16>, log_level: Option<String>) -> CliResult<()> {
    let config = Config::load(config_path)?.with_overrides(port, log_level)?;
    init_tracing(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting live query server"
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        build_server(&config)
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Load and validate a configuration file, then print it with secrets
/// redacted
pub fn validate(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let mut shown = serde_json::to_value(&config)?;
    if config.master_key.is_some() {
        shown["master_key"] = json!("<redacted>");
    }
    write_json(&json!({"valid": true, "config": shown}))
}

/// Builds the server and its subsystems.
///
/// Must be called inside a Tokio runtime; change feed workers and the
/// redis subscriber are spawned here.
pub fn build_server(config: &Config) -> HttpServer {
    let metrics = Arc::new(LiveQueryMetrics::new());
    let registry = Arc::new(SubscriptionRegistry::new());

    let identities = Arc::new(IdentityCache::new(
        identity_resolver(config),
        config.identity_cache_capacity,
        config.identity_timeout(),
    ));

    let dispatcher = Dispatcher::new(Arc::clone(&registry), identities, Arc::clone(&metrics));
    let (feed, _workers) = ChangeFeed::start(
        dispatcher,
        config.feed_workers,
        FEED_QUEUE_CAPACITY,
        Arc::clone(&metrics),
    );

    match &config.redis_uri {
        Some(uri) => match RedisChangeSource::new(uri, config.app_id.clone(), feed.clone(), Arc::clone(&metrics)) {
            Ok(source) => {
                info!(redis_uri = %uri, channels = ?source.channels(), "Subscribing to redis change channels");
                source.spawn();
            }
            Err(e) => warn!(error = %e, "Redis change subscriber disabled"),
        },
        None => info!("No redis_uri configured; accepting changes over HTTP only"),
    }

    let hub = Arc::new(LiveQueryHub::new(
        config.app_id.clone(),
        config.master_key.clone(),
        registry,
        Arc::clone(&metrics),
    ));

    let state = Arc::new(LiveQueryState::new(
        hub,
        feed,
        metrics,
        config.master_key.clone(),
    ));
    HttpServer::new(config.http_config(), state)
}

fn identity_resolver(config: &Config) -> Arc<dyn IdentityResolver> {
    match &config.server_url {
        Some(url) => {
            info!(server_url = %url, "Resolving session tokens remotely");
            Arc::new(ParseSessionResolver::new(
                url,
                config.app_id.clone(),
                config.master_key.clone(),
            ))
        }
        None => {
            warn!("No server_url configured; ACL-restricted records reach master-key clients only");
            Arc::new(StaticIdentityResolver::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validate_accepts_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("livequery.json");
        fs::write(&path, json!({"app_id": "app", "master_key": "m"}).to_string()).unwrap();

        validate(&path).unwrap();
    }

    #[test]
    fn test_start_rejects_bad_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("livequery.json");
        fs::write(&path, json!({"app_id": ""}).to_string()).unwrap();

        let err = start(&path, None, None).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }

    #[tokio::test]
    async fn test_build_server_uses_configured_address() {
        let config: Config =
            serde_json::from_value(json!({"app_id": "app", "host": "127.0.0.1", "port": 9100}))
                .unwrap();
        let server = build_server(&config);
        assert_eq!(server.socket_addr(), "127.0.0.1:9100");
    }

    #[tokio::test]
    async fn test_build_server_with_unreachable_redis() {
        let config: Config = serde_json::from_value(json!({
            "app_id": "app",
            "host": "127.0.0.1",
            "redis_uri": "redis://127.0.0.1:1"
        }))
        .unwrap();
        config.validate().unwrap();
        let server = build_server(&config);
        assert_eq!(server.socket_addr(), "127.0.0.1:8080");
    }
}
