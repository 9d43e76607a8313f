//! Persisted observation history endpoint.

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ServerError;
use crate::state::AppState;
use crate::types::HistoryQuery;

/// Newest-first persisted observations plus the stored total
///
/// GET /api/metrics/history?mode=onnx&limit=100
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ServerError> {
    let (mode, limit) = query.validate()?;

    let rows = state.store.history(mode, limit).await?;
    let total = state.store.count().await?;

    Ok(Json(json!({
        "history": rows,
        "total_stored": total,
    })))
}
