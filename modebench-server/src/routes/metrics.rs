//! Aggregate metrics, live stream and Prometheus endpoints.

use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::info;

use crate::metrics::{encode_metrics, refresh_gauges};
use crate::state::AppState;
use crate::stream::LiveUpdateStream;
use crate::types::{ComparisonView, MetricsResponse};

/// Summaries for every mode plus the baseline comparison
///
/// GET /api/metrics
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let summaries = state.collector.all_summaries();
    let comparison = ComparisonView::from_summaries(&summaries);

    Json(MetricsResponse { summaries, comparison, total_inferences: state.collector.len() })
}

/// Reset the in-memory collector. The durable store is untouched.
///
/// DELETE /api/metrics
pub async fn clear_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cleared = state.collector.len();
    state.collector.clear();
    info!(cleared, "Metrics history cleared");
    StatusCode::NO_CONTENT
}

/// Server-sent live updates
///
/// GET /api/metrics/stream
pub async fn metrics_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let updates =
        LiveUpdateStream::new(Arc::clone(&state.collector), state.config.stream.clone()).spawn();

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse(ReceiverStream::new(updates).map(|update| Event::default().json_data(update))),
    )
}

fn sse<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, axum::Error>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Prometheus metrics endpoint
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    refresh_gauges(&state.batcher.metrics(), state.collector.len());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        encode_metrics(),
    )
}
