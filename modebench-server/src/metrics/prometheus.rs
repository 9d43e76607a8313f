//! Prometheus metrics for the modebench server
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use lazy_static::lazy_static;
use modebench_core::batcher::BatcherSnapshot;
use modebench_core::Mode;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for modebench metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Inference Metrics ==============

    /// Inference requests by mode and outcome
    pub static ref INFERENCE_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("inference_requests_total", "Total number of inference requests")
            .namespace("modebench"),
        &["mode", "status"]
    ).expect("metric can be created");

    /// End-to-end inference duration, queueing included
    pub static ref INFERENCE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Inference duration in seconds"
        )
        .namespace("modebench")
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["mode"]
    ).expect("metric can be created");

    /// Output units generated per mode
    pub static ref TOKENS_GENERATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("tokens_generated_total", "Total tokens generated")
            .namespace("modebench"),
        &["mode"]
    ).expect("metric can be created");

    /// Throughput of the latest call per mode
    pub static ref TOKENS_PER_SECOND: GaugeVec = GaugeVec::new(
        Opts::new("tokens_per_second", "Token throughput of the latest inference")
            .namespace("modebench"),
        &["mode"]
    ).expect("metric can be created");

    // ============== Batcher Metrics ==============

    /// Requests waiting in the batch queue
    pub static ref BATCHER_QUEUE_SIZE: Gauge = Gauge::with_opts(
        Opts::new("batcher_queue_size", "Current number of requests in the batch queue")
            .namespace("modebench")
    ).expect("metric can be created");

    pub static ref BATCHER_BATCHES: Gauge = Gauge::with_opts(
        Opts::new("batcher_batches", "Batches processed since start")
            .namespace("modebench")
    ).expect("metric can be created");

    pub static ref BATCHER_AVG_BATCH_SIZE: Gauge = Gauge::with_opts(
        Opts::new("batcher_avg_batch_size", "Average number of requests per batch")
            .namespace("modebench")
    ).expect("metric can be created");

    /// Requests cancelled by a batcher stop
    pub static ref BATCHER_CANCELLED: Gauge = Gauge::with_opts(
        Opts::new("batcher_cancelled", "Requests cancelled before dispatch")
            .namespace("modebench")
    ).expect("metric can be created");

    // ============== Collector / Stream / Store ==============

    pub static ref OBSERVATIONS_HELD: Gauge = Gauge::with_opts(
        Opts::new("observations_held", "Observations currently held in memory")
            .namespace("modebench")
    ).expect("metric can be created");

    /// Connected live update clients
    pub static ref STREAM_CLIENTS: Gauge = Gauge::with_opts(
        Opts::new("stream_clients", "Connected live update stream clients")
            .namespace("modebench")
    ).expect("metric can be created");

    pub static ref STORE_WRITE_ERRORS_TOTAL: Counter = Counter::with_opts(
        Opts::new("store_write_errors_total", "Observations that failed to persist")
            .namespace("modebench")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    // Inference metrics
    REGISTRY.register(Box::new(INFERENCE_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INFERENCE_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(TOKENS_GENERATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKENS_PER_SECOND.clone()))?;

    // Batcher metrics
    REGISTRY.register(Box::new(BATCHER_QUEUE_SIZE.clone()))?;
    REGISTRY.register(Box::new(BATCHER_BATCHES.clone()))?;
    REGISTRY.register(Box::new(BATCHER_AVG_BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(BATCHER_CANCELLED.clone()))?;

    REGISTRY.register(Box::new(OBSERVATIONS_HELD.clone()))?;
    REGISTRY.register(Box::new(STREAM_CLIENTS.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITE_ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Copy point-in-time state into gauges. Called at scrape time.
pub fn refresh_gauges(batcher: &BatcherSnapshot, observations_held: usize) {
    BATCHER_QUEUE_SIZE.set(batcher.requests_queued as f64);
    BATCHER_BATCHES.set(batcher.batches_processed as f64);
    BATCHER_AVG_BATCH_SIZE.set(batcher.avg_batch_size);
    BATCHER_CANCELLED.set(batcher.requests_cancelled as f64);
    OBSERVATIONS_HELD.set(observations_held as f64);
}

/// Record an observation that could not be persisted.
pub fn record_store_write_error() {
    STORE_WRITE_ERRORS_TOTAL.inc();
}

/// Helper struct for tracking inference duration.
/// Counts as an error when dropped without an explicit record.
pub struct InferenceTimer {
    mode: Mode,
    start: std::time::Instant,
}

impl InferenceTimer {
    /// Start a new timer for the given mode.
    pub fn new(mode: Mode) -> Self {
        Self { mode, start: std::time::Instant::now() }
    }

    /// Record a successful inference.
    pub fn record_success(self, tokens: u32, tokens_per_sec: f64) {
        let mode = self.mode.as_str();
        INFERENCE_DURATION_SECONDS
            .with_label_values(&[mode])
            .observe(self.start.elapsed().as_secs_f64());
        INFERENCE_REQUESTS_TOTAL
            .with_label_values(&[mode, "success"])
            .inc();
        TOKENS_GENERATED_TOTAL
            .with_label_values(&[mode])
            .inc_by(tokens as f64);
        TOKENS_PER_SECOND.with_label_values(&[mode]).set(tokens_per_sec);

        // Prevent the Drop impl from running
        std::mem::forget(self);
    }

    /// Record a failed inference.
    pub fn record_failure(self) {
        self.observe_failure();
        std::mem::forget(self);
    }

    fn observe_failure(&self) {
        let mode = self.mode.as_str();
        INFERENCE_DURATION_SECONDS
            .with_label_values(&[mode])
            .observe(self.start.elapsed().as_secs_f64());
        INFERENCE_REQUESTS_TOTAL
            .with_label_values(&[mode, "error"])
            .inc();
    }
}

impl Drop for InferenceTimer {
    fn drop(&mut self) {
        self.observe_failure();
    }
}

/// Keeps the stream client gauge in step with a live connection.
pub struct StreamClientGuard;

impl StreamClientGuard {
    pub fn connect() -> Self {
        STREAM_CLIENTS.inc();
        Self
    }
}

impl Drop for StreamClientGuard {
    fn drop(&mut self) {
        STREAM_CLIENTS.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Fresh registry so the global one stays untouched
        let registry = Registry::new();
        let counter = Counter::new("test_counter", "Test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();

        counter.inc();
        assert_eq!(counter.get(), 1.0);
    }

    #[test]
    fn test_inference_timer() {
        let before = INFERENCE_REQUESTS_TOTAL
            .with_label_values(&["quantized", "success"])
            .get();
        InferenceTimer::new(Mode::Quantized).record_success(10, 100.0);
        let after = INFERENCE_REQUESTS_TOTAL
            .with_label_values(&["quantized", "success"])
            .get();
        // Other tests may bump the same series concurrently
        assert!(after - before >= 1.0);
    }

    #[test]
    fn test_dropped_timer_counts_error() {
        let before = INFERENCE_REQUESTS_TOTAL
            .with_label_values(&["torchscript", "error"])
            .get();
        drop(InferenceTimer::new(Mode::Torchscript));
        let after = INFERENCE_REQUESTS_TOTAL
            .with_label_values(&["torchscript", "error"])
            .get();
        // Other tests may bump the same series concurrently
        assert!(after - before >= 1.0);
    }

    #[test]
    fn test_encode_metrics() {
        let output = encode_metrics();
        // Empty until register_metrics has run
        assert!(output.is_empty() || output.starts_with('#') || output.contains("modebench"));
    }
}
