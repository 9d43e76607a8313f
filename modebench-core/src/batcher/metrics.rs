//! Metrics for the request batcher.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What ended a batch-collection window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushTrigger {
    /// `max_batch_size` requests were collected
    Size,
    /// `max_wait_time` elapsed since the first request
    Deadline,
}

/// Metrics for monitoring batcher performance
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    /// Total requests accepted by `submit`
    pub requests_received: AtomicU64,

    /// Requests currently in queue
    pub requests_queued: AtomicU64,

    /// Maximum queue depth observed
    pub max_queue_depth: AtomicU64,

    /// Requests resolved with a backend result
    pub requests_completed: AtomicU64,

    /// Requests resolved with a backend error
    pub requests_failed: AtomicU64,

    /// Requests resolved with `Cancelled` on stop
    pub requests_cancelled: AtomicU64,

    /// Requests whose caller went away before dispatch
    pub requests_abandoned: AtomicU64,

    /// Requests handed to the backend
    pub requests_dispatched: AtomicU64,

    /// Number of batches processed
    pub batches_processed: AtomicU64,

    /// Total requests in batches (for batch size averaging)
    pub total_batch_requests: AtomicU64,

    pub size_flushes: AtomicU64,
    pub deadline_flushes: AtomicU64,

    /// Total queue wait time in microseconds (for averaging)
    pub total_queue_wait_us: AtomicU64,
}

impl BatcherMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering the queue
    pub fn record_queued(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        let queued = self.requests_queued.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_queue_depth.fetch_max(queued, Ordering::Relaxed);
    }

    /// Record a request leaving the queue for the backend
    pub fn record_dequeued(&self, wait_time: Duration) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_queue_wait_us
            .fetch_add(wait_time.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a batch being processed
    pub fn record_batch(&self, batch_size: usize, trigger: FlushTrigger) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.total_batch_requests
            .fetch_add(batch_size as u64, Ordering::Relaxed);

        let counter = match trigger {
            FlushTrigger::Size => &self.size_flushes,
            FlushTrigger::Deadline => &self.deadline_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.requests_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` undispatched requests resolved with `Cancelled`
    pub fn record_cancelled(&self, count: usize) {
        self.requests_queued
            .fetch_sub(count as u64, Ordering::Relaxed);
        self.requests_cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get current queue depth
    pub fn queue_depth(&self) -> u64 {
        self.requests_queued.load(Ordering::Relaxed)
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_processed.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let total_requests = self.total_batch_requests.load(Ordering::Relaxed);
        total_requests as f64 / batches as f64
    }

    /// Calculate average queue wait time in milliseconds
    pub fn avg_queue_wait_ms(&self) -> f64 {
        let dispatched = self.requests_dispatched.load(Ordering::Relaxed);
        if dispatched == 0 {
            return 0.0;
        }
        let total_wait = self.total_queue_wait_us.load(Ordering::Relaxed);
        total_wait as f64 / dispatched as f64 / 1000.0
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> BatcherSnapshot {
        BatcherSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            requests_abandoned: self.requests_abandoned.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            deadline_flushes: self.deadline_flushes.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
            avg_queue_wait_ms: self.avg_queue_wait_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatcherSnapshot {
    pub requests_received: u64,
    pub requests_queued: u64,
    pub max_queue_depth: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub requests_abandoned: u64,
    pub batches_processed: u64,
    pub size_flushes: u64,
    pub deadline_flushes: u64,
    pub avg_batch_size: f64,
    pub avg_queue_wait_ms: f64,
}
