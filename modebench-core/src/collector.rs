//! Metrics collection for inference benchmarking.
//!
//! [`MetricsCollector`] is a thread-safe, bounded-history ledger of
//! [`Observation`]s. The lock guards append and snapshot-copy only;
//! statistics are computed afterwards over the copy.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::analyzer::{mean, percentile, sorted};
use crate::backend::InferenceResult;
use crate::mode::Mode;

/// Default number of observations kept in memory
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// Minimum time span (seconds) used when deriving requests/sec
const MIN_SPAN_SECS: f64 = 0.001;

/// A single recorded inference measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub mode: Mode,
    pub latency_ms: f64,
    pub tokens_per_sec: f64,
    pub memory_mb: f64,
    pub tokens_generated: u32,
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
}

impl Observation {
    /// Observation for `result`, stamped now
    pub fn from_result(mode: Mode, result: &InferenceResult) -> Self {
        Self::at(
            mode,
            result.latency_ms,
            result.tokens_per_sec,
            result.memory_mb,
            result.tokens_generated,
            now_secs(),
        )
    }

    /// Observation with an explicit timestamp. Negative measurements clamp to zero.
    pub fn at(
        mode: Mode,
        latency_ms: f64,
        tokens_per_sec: f64,
        memory_mb: f64,
        tokens_generated: u32,
        timestamp: f64,
    ) -> Self {
        Self {
            mode,
            latency_ms: latency_ms.max(0.0),
            tokens_per_sec: tokens_per_sec.max(0.0),
            memory_mb: memory_mb.max(0.0),
            tokens_generated,
            timestamp,
        }
    }
}

/// Current wall-clock time as fractional Unix seconds
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Latency distribution (milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

/// Throughput distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub mean_tokens_per_sec: f64,
    pub max_tokens_per_sec: f64,
    pub requests_per_sec: f64,
}

/// Memory distribution (MB)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub mean_mb: f64,
    pub peak_mb: f64,
}

/// Aggregate statistics for one mode, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mode: Mode,
    pub count: usize,
    pub latency: Option<LatencyStats>,
    pub throughput: Option<ThroughputStats>,
    pub memory: Option<MemoryStats>,
}

impl Summary {
    /// Zero-count summary
    pub fn empty(mode: Mode) -> Self {
        Self { mode, count: 0, latency: None, throughput: None, memory: None }
    }

    /// Summarize observations recorded for `mode`, in recording order.
    pub fn from_observations(mode: Mode, observations: &[Observation]) -> Self {
        if observations.is_empty() {
            return Self::empty(mode);
        }

        let latencies: Vec<f64> = observations.iter().map(|o| o.latency_ms).collect();
        let throughputs: Vec<f64> = observations.iter().map(|o| o.tokens_per_sec).collect();
        let memories: Vec<f64> = observations.iter().map(|o| o.memory_mb).collect();

        let ordered = sorted(&latencies);
        let count = observations.len();

        let requests_per_sec = if count > 1 {
            let span = observations[count - 1].timestamp - observations[0].timestamp;
            (count - 1) as f64 / span.max(MIN_SPAN_SECS)
        } else {
            0.0
        };

        Self {
            mode,
            count,
            latency: Some(LatencyStats {
                mean: mean(&ordered),
                p50: percentile(&ordered, 50.0),
                p95: percentile(&ordered, 95.0),
                p99: percentile(&ordered, 99.0),
                min: ordered[0],
                max: ordered[count - 1],
            }),
            throughput: Some(ThroughputStats {
                mean_tokens_per_sec: mean(&throughputs),
                max_tokens_per_sec: throughputs.iter().copied().fold(0.0, f64::max),
                requests_per_sec,
            }),
            memory: Some(MemoryStats {
                mean_mb: mean(&memories),
                peak_mb: memories.iter().copied().fold(0.0, f64::max),
            }),
        }
    }
}

/// Thread-safe collector that records inference metrics and computes aggregates
#[derive(Debug)]
pub struct MetricsCollector {
    history: Mutex<VecDeque<Observation>>,
    max_history: usize,
    total_recorded: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl MetricsCollector {
    /// Create a collector keeping at most `max_history` observations (minimum 1)
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(1);
        Self {
            history: Mutex::new(VecDeque::with_capacity(max_history.min(DEFAULT_MAX_HISTORY))),
            max_history,
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Append an observation, evicting the oldest once over capacity
    pub fn record(&self, observation: Observation) {
        let mut history = self.history.lock();
        history.push_back(observation);
        while history.len() > self.max_history {
            history.pop_front();
        }
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Summary for `mode`; zero-count when nothing was recorded for it
    pub fn summary(&self, mode: Mode) -> Summary {
        Summary::from_observations(mode, &self.observations_for(mode))
    }

    /// One summary per mode with at least one observation, in mode order
    pub fn all_summaries(&self) -> BTreeMap<Mode, Summary> {
        let snapshot = self.snapshot();

        let mut by_mode: BTreeMap<Mode, Vec<Observation>> = BTreeMap::new();
        for observation in snapshot {
            by_mode.entry(observation.mode).or_default().push(observation);
        }

        by_mode
            .into_iter()
            .map(|(mode, observations)| (mode, Summary::from_observations(mode, &observations)))
            .collect()
    }

    /// The `n` most recently recorded observations, oldest first
    pub fn recent(&self, n: usize) -> Vec<Observation> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Observations recorded after `cursor` (a previous `total_recorded` value),
    /// newest `max` at most, oldest first, together with the current total.
    ///
    /// Both are read under one lock so the pair is consistent. A cursor ahead
    /// of the total is treated as 0.
    pub fn observations_since(&self, cursor: u64, max: usize) -> (Vec<Observation>, u64) {
        let history = self.history.lock();
        let total = self.total_recorded.load(Ordering::Relaxed);
        let cursor = if cursor > total { 0 } else { cursor };

        let delta = usize::try_from(total - cursor).unwrap_or(usize::MAX);
        let take = delta.min(max).min(history.len());
        let skip = history.len() - take;
        (history.iter().skip(skip).cloned().collect(), total)
    }

    /// Observations currently held for `mode`, oldest first
    pub fn observations_for(&self, mode: Mode) -> Vec<Observation> {
        let history = self.history.lock();
        history.iter().filter(|o| o.mode == mode).cloned().collect()
    }

    /// Copy of the full history, oldest first
    pub fn snapshot(&self) -> Vec<Observation> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of observations currently held
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Monotonic count of every `record` call since construction.
    ///
    /// Unaffected by eviction and `clear`, so it keeps moving after the
    /// history saturates.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }

    /// Reset history (test/ops tooling)
    pub fn clear(&self) {
        self.history.lock().clear();
    }
}
