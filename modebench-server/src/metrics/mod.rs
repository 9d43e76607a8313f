//! Metrics module for the modebench server
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

pub use prometheus::{
    encode_metrics, record_store_write_error, refresh_gauges, register_metrics, InferenceTimer,
    StreamClientGuard,
};
