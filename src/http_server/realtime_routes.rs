//! Realtime HTTP Routes and WebSocket Handler
//!
//! The live-query WebSocket endpoint and the upstream change ingest
//! endpoints (`POST /events/afterSave`, `POST /events/afterDelete`).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::server::LiveQueryState;
use crate::realtime::{serve_socket, ChangeEvent, ChangeKind};

/// Header carrying the master key on ingest requests
pub const MASTER_KEY_HEADER: &str = "X-Parse-Master-Key";

// ==================
// Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16(),
        }),
    )
}

// ==================
// Router
// ==================

/// Create realtime routes
pub fn realtime_routes(state: Arc<LiveQueryState>, websocket_path: &str) -> Router {
    Router::new()
        .route(websocket_path, get(websocket_handler))
        .route("/events/:kind", post(ingest_handler))
        .with_state(state)
}

// ==================
// Handlers
// ==================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<LiveQueryState>>,
) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn ingest_handler(
    State(state): State<Arc<LiveQueryState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(kind) = ChangeKind::from_suffix(&kind) else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown event {}", kind))
            .into_response();
    };

    if let Some(expected) = &state.master_key {
        let given = headers.get(MASTER_KEY_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            warn!(event = kind.suffix(), "Ingest request without valid master key");
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    let event = serde_json::from_slice::<Value>(&body)
        .map_err(|e| e.to_string())
        .and_then(|message| ChangeEvent::from_upstream(kind, &message).map_err(|e| e.to_string()));
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            state.metrics.increment_rejected();
            warn!(event = kind.suffix(), error = %e, "Rejected upstream message");
            return error_response(StatusCode::BAD_REQUEST, e).into_response();
        }
    };

    let response = QueuedResponse {
        queued: true,
        class_name: event.class_name.clone(),
        object_id: event.object_id.clone(),
    };
    debug!(event = kind.suffix(), class_name = %response.class_name, object_id = %response.object_id, "Queued upstream message");

    match state.feed.publish(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
