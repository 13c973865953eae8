//! Observability HTTP Routes
//!
//! Health check and live-query statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use super::server::LiveQueryState;
use crate::observability::MetricsSnapshot;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Statistics response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub clients: usize,
    pub subscriptions: usize,
    pub subscriptions_by_class: BTreeMap<String, usize>,
    pub started_at: String,
    pub uptime_secs: i64,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

/// Health check route
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

/// Statistics route
pub fn stats_routes(state: Arc<LiveQueryState>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

async fn stats_handler(State(state): State<Arc<LiveQueryState>>) -> impl IntoResponse {
    let response = StatsResponse {
        clients: state.hub.client_count(),
        subscriptions: state.hub.registry().count(),
        subscriptions_by_class: state.hub.registry().class_counts(),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        counters: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}
