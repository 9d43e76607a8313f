//! Live update stream.
//!
//! Each connected client gets its own task holding a cursor into the
//! collector's monotonic record counter. On every tick the task emits the
//! observations recorded since the cursor together with fresh summaries,
//! or nothing when no new data exists.
//!
//! Output per client is bounded by a small channel. A slow client simply
//! misses ticks: the cursor only advances once a message has been accepted,
//! so the next accepted message carries the whole accumulated delta.

use modebench_core::{MetricsCollector, Mode, Observation, Summary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::metrics::StreamClientGuard;

/// Configuration for live update streams
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Polling interval
    pub tick: Duration,
    /// Messages buffered per client before ticks are skipped
    pub buffer: usize,
    /// Upper bound on observations carried by one message
    pub max_recent: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { tick: Duration::from_millis(500), buffer: 16, max_recent: 500 }
    }
}

impl StreamConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("MODEBENCH_STREAM_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.tick = Duration::from_millis(ms);
        }
        config
    }
}

/// One message on the live stream
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub recent: Vec<Observation>,
    pub summaries: BTreeMap<Mode, Summary>,
    pub total: u64,
}

/// Per-client cursor over a shared collector
pub struct LiveUpdateStream {
    collector: Arc<MetricsCollector>,
    config: StreamConfig,
    last_count: u64,
}

impl LiveUpdateStream {
    pub fn new(collector: Arc<MetricsCollector>, config: StreamConfig) -> Self {
        Self { collector, config, last_count: 0 }
    }

    /// Build the next message if anything was recorded since the cursor.
    ///
    /// Does not move the cursor; call [`Self::advance`] once the message is delivered.
    pub fn poll(&mut self) -> Option<LiveUpdate> {
        let (recent, total) = self
            .collector
            .observations_since(self.last_count, self.config.max_recent);

        if total < self.last_count {
            // Counter went backwards: start over
            self.last_count = 0;
        }
        if total == self.last_count {
            return None;
        }

        Some(LiveUpdate { recent, summaries: self.collector.all_summaries(), total })
    }

    /// Move the cursor to `total`
    pub fn advance(&mut self, total: u64) {
        self.last_count = total;
    }

    /// Run this stream on its own task, delivering into a bounded channel.
    ///
    /// The task ends as soon as the receiver is dropped.
    pub fn spawn(mut self) -> mpsc::Receiver<LiveUpdate> {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));

        tokio::spawn(async move {
            let _client = StreamClientGuard::connect();
            let mut ticker = time::interval(self.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let Some(update) = self.poll() else { continue };
                        let total = update.total;
                        match tx.try_send(update) {
                            Ok(()) => self.advance(total),
                            Err(TrySendError::Full(_)) => {
                                debug!(cursor = self.last_count, "Live client lagging, skipping tick");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!("Live update stream closed");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modebench_core::collector::now_secs;

    fn obs(mode: Mode) -> Observation {
        Observation::at(mode, 10.0, 50.0, 300.0, 5, now_secs())
    }

    fn fast_config(buffer: usize) -> StreamConfig {
        StreamConfig { tick: Duration::from_millis(20), buffer, max_recent: 500 }
    }

    #[test]
    fn test_poll_emits_only_new_data() {
        let collector = Arc::new(MetricsCollector::default());
        let mut stream = LiveUpdateStream::new(Arc::clone(&collector), StreamConfig::default());

        assert!(stream.poll().is_none());

        collector.record(obs(Mode::Baseline));
        collector.record(obs(Mode::Onnx));
        let update = stream.poll().unwrap();
        assert_eq!(update.recent.len(), 2);
        assert_eq!(update.total, 2);
        assert_eq!(update.summaries.len(), 2);

        stream.advance(update.total);
        assert!(stream.poll().is_none());

        collector.record(obs(Mode::Baseline));
        let update = stream.poll().unwrap();
        assert_eq!(update.recent.len(), 1);
        assert_eq!(update.total, 3);
    }

    #[test]
    fn test_undelivered_delta_accumulates() {
        let collector = Arc::new(MetricsCollector::default());
        let mut stream = LiveUpdateStream::new(Arc::clone(&collector), StreamConfig::default());

        collector.record(obs(Mode::Baseline));
        assert_eq!(stream.poll().unwrap().recent.len(), 1);
        // Not advanced: the next poll still covers the first record
        collector.record(obs(Mode::Baseline));
        assert_eq!(stream.poll().unwrap().recent.len(), 2);
    }

    #[test]
    fn test_keeps_emitting_after_history_saturates() {
        let collector = Arc::new(MetricsCollector::new(2));
        let mut stream = LiveUpdateStream::new(Arc::clone(&collector), StreamConfig::default());

        for _ in 0..5 {
            collector.record(obs(Mode::Baseline));
        }
        let update = stream.poll().unwrap();
        assert_eq!(update.recent.len(), 2);
        stream.advance(update.total);

        collector.record(obs(Mode::Baseline));
        let update = stream.poll().unwrap();
        assert_eq!(update.recent.len(), 1);
        assert_eq!(update.total, 6);
    }

    #[test]
    fn test_recent_is_capped() {
        let collector = Arc::new(MetricsCollector::default());
        let config = StreamConfig { max_recent: 3, ..StreamConfig::default() };
        let mut stream = LiveUpdateStream::new(Arc::clone(&collector), config);

        for _ in 0..10 {
            collector.record(obs(Mode::Baseline));
        }
        let update = stream.poll().unwrap();
        assert_eq!(update.recent.len(), 3);
        assert_eq!(update.total, 10);
    }

    #[tokio::test]
    async fn test_spawned_stream_delivers_updates() {
        let collector = Arc::new(MetricsCollector::default());
        let mut rx = LiveUpdateStream::new(Arc::clone(&collector), fast_config(4)).spawn();

        collector.record(obs(Mode::Baseline));
        let update = time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(update.total, 1);

        // Nothing new: no message within several ticks
        assert!(time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        collector.record(obs(Mode::Onnx));
        let update = time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(update.recent.len(), 1);
        assert_eq!(update.recent[0].mode, Mode::Onnx);
        assert_eq!(update.total, 2);
    }

    #[tokio::test]
    async fn test_full_buffer_carries_delta_forward() {
        let collector = Arc::new(MetricsCollector::default());
        let mut rx = LiveUpdateStream::new(Arc::clone(&collector), fast_config(1)).spawn();

        collector.record(obs(Mode::Baseline));
        time::sleep(Duration::from_millis(100)).await;
        // First message sits in the buffer; later ticks are skipped
        collector.record(obs(Mode::Baseline));
        collector.record(obs(Mode::Baseline));
        time::sleep(Duration::from_millis(100)).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.total, 1);
        let second = time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.recent.len(), 2);
    }
}
