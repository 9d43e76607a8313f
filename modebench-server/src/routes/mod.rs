//! HTTP route handlers for the modebench server.
//!
//! - `health`: liveness and status
//! - `inference`: single inference in any mode
//! - `metrics`: aggregates, live stream, Prometheus exposition
//! - `benchmark`: sweep across every mode
//! - `history`: persisted observations
//! - `models`: backend inventory

pub mod benchmark;
pub mod health;
pub mod history;
pub mod inference;
pub mod metrics;
pub mod models;

pub use benchmark::benchmark;
pub use health::{health, live};
pub use history::history;
pub use inference::inference;
pub use metrics::{clear_metrics, get_metrics, metrics_prometheus, metrics_stream};
pub use models::models;
