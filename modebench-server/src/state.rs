//! Application state for the modebench server.
//!
//! Everything a handler needs is reachable from [`AppState`], constructed
//! once at startup and shared through axum's `State` extractor.

use modebench_core::backend::SimulationConfig;
use modebench_core::collector::DEFAULT_MAX_HISTORY;
use modebench_core::{BackendRegistry, Batcher, BatcherConfig, MetricsCollector, Mode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::error::ServerError;
use crate::store::{ObservationStore, DEFAULT_STORE_PATH};
use crate::stream::StreamConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port to listen on
    pub port: u16,

    /// Observations kept in memory by the collector
    pub max_history: usize,

    /// JSON-lines store location; `None` keeps history in memory only
    pub store_path: Option<PathBuf>,

    /// Warm-up calls made against the baseline backend at startup
    pub warmup_runs: usize,

    pub batcher: BatcherConfig,
    pub stream: StreamConfig,
    pub simulation: SimulationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_history: DEFAULT_MAX_HISTORY,
            store_path: Some(PathBuf::from(DEFAULT_STORE_PATH)),
            warmup_runs: 2,
            batcher: BatcherConfig::default(),
            stream: StreamConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("MODEBENCH_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            max_history: std::env::var("MODEBENCH_MAX_HISTORY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_HISTORY),
            store_path: Some(
                std::env::var("MODEBENCH_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            ),
            warmup_runs: std::env::var("MODEBENCH_WARMUP_RUNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            batcher: BatcherConfig::from_env(),
            stream: StreamConfig::from_env(),
            simulation: SimulationConfig::from_env(),
        }
    }

    /// Config for tests: in-memory store, no simulated compute, no warm-up
    pub fn ephemeral() -> Self {
        Self {
            store_path: None,
            warmup_runs: 0,
            simulation: SimulationConfig::instant(),
            ..Self::default()
        }
    }
}

/// Application state shared across all handlers
pub struct AppState {
    pub config: AppConfig,

    /// One backend per non-batched mode
    pub registry: BackendRegistry,

    /// Dynamic batcher in front of the baseline backend
    pub batcher: Arc<Batcher>,

    pub collector: Arc<MetricsCollector>,
    pub store: ObservationStore,
    pub started_at: Instant,
}

impl AppState {
    /// Build state with simulated backends and the configured store.
    pub async fn from_config(config: AppConfig) -> Result<Arc<Self>, ServerError> {
        let registry = BackendRegistry::simulated(&config.simulation)?;
        let store = match &config.store_path {
            Some(path) => ObservationStore::open(path).await?,
            None => ObservationStore::in_memory(),
        };
        Self::new(config, registry, store)
    }

    /// Assemble state from explicit parts and start the batcher.
    pub fn new(
        config: AppConfig,
        registry: BackendRegistry,
        store: ObservationStore,
    ) -> Result<Arc<Self>, ServerError> {
        config.batcher.validate()?;

        // The batched mode shares the baseline backend
        let baseline = registry.get(Mode::Baseline)?;
        let batcher = Arc::new(Batcher::new(config.batcher.clone(), baseline));
        batcher.start()?;

        Ok(Arc::new(Self {
            collector: Arc::new(MetricsCollector::new(config.max_history)),
            config,
            registry,
            batcher,
            store,
            started_at: Instant::now(),
        }))
    }

    /// Load and warm the baseline backend. Other modes load on first use.
    pub async fn warmup(&self) -> Result<(), ServerError> {
        let baseline = self.registry.get(Mode::Baseline)?;
        let runs = self.config.warmup_runs;

        tokio::task::spawn_blocking(move || {
            baseline.load()?;
            baseline.warmup(runs)
        })
        .await
        .map_err(|e| ServerError::internal(format!("warm-up task failed: {}", e)))??;

        info!(runs, "Baseline backend ready");
        Ok(())
    }

    /// Stop the batcher; anything still queued resolves as cancelled.
    pub async fn shutdown(&self) {
        self.batcher.stop().await;
    }
}
