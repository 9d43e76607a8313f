//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// Health check endpoint
///
/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "loaded_servers": state.registry.loaded_modes(),
        "batcher_running": state.batcher.is_running(),
        "total_inferences": state.collector.len(),
        "batcher": state.batcher.metrics(),
        "store_write_errors": state.store.write_errors(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
