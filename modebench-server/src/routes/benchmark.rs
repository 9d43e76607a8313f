//! Benchmark sweep endpoint.

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::error::ServerError;
use crate::state::AppState;
use crate::sweep::run_sweep;
use crate::types::{BenchmarkRequest, BenchmarkResponse, ComparisonView};

/// Run the same workload against every mode
///
/// POST /api/benchmark
pub async fn benchmark(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BenchmarkRequest>,
) -> Result<Json<BenchmarkResponse>, ServerError> {
    request.validate()?;

    info!(
        num_requests = request.num_requests,
        max_new_tokens = request.max_new_tokens,
        "Starting benchmark sweep"
    );

    let results = run_sweep(&state, &request).await;
    let summaries = state.collector.all_summaries();
    let comparison = ComparisonView::from_summaries(&summaries);

    Ok(Json(BenchmarkResponse { results, summaries, comparison }))
}
