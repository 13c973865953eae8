//! # Live-Query HTTP Server
//!
//! Serves the live-query WebSocket endpoint and the routes around it.
//!
//! # Endpoints
//!
//! - `{websocket_path}` - WebSocket upgrade (default `/parse`)
//! - `POST /events/afterSave`, `POST /events/afterDelete` - upstream change ingest
//! - `/health` - Health check
//! - `/stats` - Connection, subscription and push counters

pub mod config;
pub mod observability_routes;
pub mod realtime_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use server::{HttpServer, LiveQueryState};
