//! modebench server library
//!
//! HTTP surface for benchmarking inference optimization modes: single
//! inference in any mode, a dynamic batcher in front of the baseline
//! backend, aggregate and live metrics, sweeps and persisted history.
//!
//! Used by the `modebench-server` binary and by `modebench serve`.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod stream;
pub mod sweep;
pub mod types;

pub use error::ServerError;
pub use state::{AppConfig, AppState};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app: AppConfig,
    /// Whether to print the banner on startup
    pub print_banner: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { app: AppConfig::default(), print_banner: true }
    }
}

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the application router around `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(routes::health))
        .route("/live", get(routes::live))
        // Inference
        .route("/api/inference", post(routes::inference))
        .route("/api/benchmark", post(routes::benchmark))
        // Metrics
        .route(
            "/api/metrics",
            get(routes::get_metrics).delete(routes::clear_metrics),
        )
        .route("/api/metrics/stream", get(routes::metrics_stream))
        .route("/api/metrics/history", get(routes::history))
        .route("/api/models", get(routes::models))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the modebench server.
///
/// Starts the HTTP server and blocks until Ctrl-C. On shutdown the batcher
/// is stopped so queued requests resolve as cancelled.
///
/// # Example
/// ```no_run
/// use modebench_server::{run_server, AppConfig, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig { app: AppConfig::from_env(), print_banner: false };
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    init_metrics();

    info!(
        port = config.app.port,
        store = ?config.app.store_path,
        "Starting modebench server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::from_config(config.app.clone()).await?;

    // Only the baseline is loaded eagerly
    match state.warmup().await {
        Ok(()) => info!("Baseline backend warmed up"),
        Err(e) => warn!("Baseline warm-up failed: {}. It will load on first request.", e),
    }

    let app = build_router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("modebench listening on http://{}", addr);

    if config.print_banner {
        print_banner(&config, &state);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Print the startup banner
fn print_banner(config: &ServerConfig, state: &Arc<AppState>) {
    let addr = format!("0.0.0.0:{}", config.app.port);
    let batcher = state.batcher.config();

    println!();
    println!("==================================================");
    println!("  modebench v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://{}", addr);
    println!(
        "  Store: {}",
        config
            .app
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in-memory".to_string())
    );
    println!();
    println!("  Batcher configuration:");
    println!("    Max batch size: {}", batcher.max_batch_size);
    println!("    Max wait: {}ms", batcher.max_wait_time.as_millis());
    println!();
    println!("  Collector: max history {}", config.app.max_history);
    println!("  Live stream tick: {}ms", config.app.stream.tick.as_millis());
    println!();
    println!("  Endpoints:");
    println!("    Inference: POST /api/inference");
    println!("    Benchmark: POST /api/benchmark");
    println!("    Metrics:   GET  /api/metrics, /api/metrics/stream, /api/metrics/history");
    println!("    Models:    GET  /api/models");
    println!("    Health:    GET  /api/health, /live");
    println!("    Prometheus: GET /metrics/prometheus");
    println!("==================================================");
    println!();
}
