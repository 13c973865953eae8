//! # HTTP Server
//!
//! Combines the WebSocket, ingest and observability routers into one
//! axum server.

use std::io;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::HttpServerConfig;
use super::observability_routes::{health_routes, stats_routes};
use super::realtime_routes::realtime_routes;
use crate::observability::LiveQueryMetrics;
use crate::realtime::{ChangeFeed, LiveQueryHub};

/// State shared across handlers
pub struct LiveQueryState {
    pub hub: Arc<LiveQueryHub>,
    pub feed: ChangeFeed,
    pub metrics: Arc<LiveQueryMetrics>,
    /// Required on ingest requests when set
    pub master_key: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl LiveQueryState {
    pub fn new(
        hub: Arc<LiveQueryHub>,
        feed: ChangeFeed,
        metrics: Arc<LiveQueryMetrics>,
        master_key: Option<String>,
    ) -> Self {
        Self {
            hub,
            feed,
            metrics,
            master_key,
            started_at: Utc::now(),
        }
    }
}

/// Live-query HTTP server
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: Arc<LiveQueryState>) -> Self {
        let router = Self::build_router(&config, state);
        Self { config, router }
    }

    fn build_router(config: &HttpServerConfig, state: Arc<LiveQueryState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(health_routes())
            .merge(stats_routes(Arc::clone(&state)))
            .merge(realtime_routes(state, &config.websocket_path))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind the configured address and serve until the process stops
    pub async fn start(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()?).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            websocket_path = %self.config.websocket_path,
            "Live query server listening"
        );
        axum::serve(listener, self.router).await
    }
}
