//! Batching engine: shared queue plus a single consumer loop.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::BatcherConfig;
use super::metrics::{BatcherMetrics, BatcherSnapshot, FlushTrigger};
use crate::backend::{InferenceBackend, InferenceResult};
use crate::error::{BackendError, BatcherError};

/// Backend result plus the size of the batch it was processed in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedResult {
    pub result: InferenceResult,
    pub batch_size: usize,
}

type Completion = oneshot::Sender<Result<BatchedResult, BatcherError>>;

/// A submitted request waiting for its batch.
///
/// The completion sender is consumed on resolution, so a request can be
/// resolved at most once. Every path out of the queue resolves it.
struct PendingRequest {
    id: Uuid,
    payload: String,
    max_output_units: u32,
    submitted_at: Instant,
    completion: Completion,
}

impl PendingRequest {
    fn resolve(self, outcome: Result<BatchedResult, BatcherError>) {
        if self.completion.send(outcome).is_err() {
            debug!(request_id = %self.id, "Caller dropped before completion");
        }
    }
}

struct QueueState {
    pending: VecDeque<PendingRequest>,
    accepting: bool,
    /// Bumped on every start so a loop from a previous run cannot resume
    epoch: u64,
}

impl QueueState {
    fn is_current(&self, epoch: u64) -> bool {
        self.accepting && self.epoch == epoch
    }
}

/// Groups concurrently submitted requests into batches for one backend
pub struct Batcher {
    config: BatcherConfig,
    backend: Arc<dyn InferenceBackend>,
    queue: Mutex<QueueState>,
    notify: Notify,
    metrics: BatcherMetrics,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    /// Create a stopped batcher. A `max_batch_size` of 0 is treated as 1.
    pub fn new(mut config: BatcherConfig, backend: Arc<dyn InferenceBackend>) -> Self {
        config.max_batch_size = config.max_batch_size.max(1);
        Self {
            config,
            backend,
            queue: Mutex::new(QueueState { pending: VecDeque::new(), accepting: false, epoch: 0 }),
            notify: Notify::new(),
            metrics: BatcherMetrics::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Whether the engine is accepting submissions
    pub fn is_running(&self) -> bool {
        self.queue.lock().accepting
    }

    pub fn metrics(&self) -> BatcherSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the consumer loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), BatcherError> {
        let epoch = {
            let mut queue = self.queue.lock();
            if queue.accepting {
                return Err(BatcherError::AlreadyRunning);
            }
            queue.accepting = true;
            queue.epoch += 1;
            queue.epoch
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(epoch).await });
        *self.worker.lock() = Some(handle);

        info!(
            max_batch_size = self.config.max_batch_size,
            max_wait_ms = self.config.max_wait_time.as_millis() as u64,
            "Batcher started"
        );
        Ok(())
    }

    /// Stop accepting work, cancel everything not yet dispatched and wait for the
    /// loop to exit. A backend call already in flight runs to completion.
    pub async fn stop(&self) {
        let drained: Vec<PendingRequest> = {
            let mut queue = self.queue.lock();
            queue.accepting = false;
            queue.pending.drain(..).collect()
        };
        self.notify.notify_one();
        self.cancel(drained);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Batcher loop terminated abnormally");
            }
            info!("Batcher stopped");
        }
    }

    /// Queue one request and wait for its own outcome.
    ///
    /// Fails with [`BatcherError::Cancelled`] when the engine is not running
    /// or is stopped before the request is dispatched.
    pub async fn submit(
        &self,
        payload: impl Into<String>,
        max_output_units: u32,
    ) -> Result<BatchedResult, BatcherError> {
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            id: Uuid::new_v4(),
            payload: payload.into(),
            max_output_units,
            submitted_at: Instant::now(),
            completion: tx,
        };

        {
            let mut queue = self.queue.lock();
            if !queue.accepting {
                return Err(BatcherError::Cancelled);
            }
            queue.pending.push_back(request);
            self.metrics.record_queued();
        }
        self.notify.notify_one();

        rx.await.unwrap_or(Err(BatcherError::Cancelled))
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        while let Some(first) = self.next_request(epoch).await {
            let Some((batch, trigger)) = self.collect_batch(first, epoch).await else {
                break;
            };
            self.process_batch(batch, trigger, epoch).await;
        }
        debug!(epoch, "Batcher loop exited");
    }

    /// Wait for the first request of the next batch. `None` once stopped.
    async fn next_request(&self, epoch: u64) -> Option<PendingRequest> {
        loop {
            {
                let mut queue = self.queue.lock();
                if !queue.is_current(epoch) {
                    return None;
                }
                if let Some(request) = queue.pending.pop_front() {
                    return Some(request);
                }
            }

            // Idle wake-up only exists to observe stop
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Collect up to `max_batch_size` requests, never waiting past the deadline.
    ///
    /// Returns `None` when stopped mid-collection; the partial batch has then
    /// been resolved with `Cancelled`.
    async fn collect_batch(
        &self,
        first: PendingRequest,
        epoch: u64,
    ) -> Option<(Vec<PendingRequest>, FlushTrigger)> {
        let max = self.config.max_batch_size;
        let deadline = time::Instant::now() + self.config.max_wait_time;

        let mut batch = Vec::with_capacity(max);
        batch.push(first);

        loop {
            {
                let mut queue = self.queue.lock();
                if !queue.is_current(epoch) {
                    drop(queue);
                    self.cancel(batch);
                    return None;
                }
                while batch.len() < max {
                    match queue.pending.pop_front() {
                        Some(request) => batch.push(request),
                        None => break,
                    }
                }
                if batch.len() >= max {
                    return Some((batch, FlushTrigger::Size));
                }
            }

            if time::Instant::now() >= deadline {
                return Some((batch, FlushTrigger::Deadline));
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = time::sleep_until(deadline) => {}
            }
        }
    }

    /// Run each request through the backend in arrival order, resolving each one
    /// with its own outcome. Once stopped, nothing further is dispatched.
    async fn process_batch(&self, batch: Vec<PendingRequest>, trigger: FlushTrigger, epoch: u64) {
        let batch_size = batch.len();
        self.metrics.record_batch(batch_size, trigger);
        debug!(batch_size, ?trigger, "Processing batch");

        let mut remaining = batch.into_iter();
        while let Some(request) = remaining.next() {
            if !self.queue.lock().is_current(epoch) {
                let mut undispatched = vec![request];
                undispatched.extend(remaining);
                self.cancel(undispatched);
                return;
            }

            if request.completion.is_closed() {
                self.metrics.record_abandoned();
                debug!(request_id = %request.id, "Caller went away before dispatch, skipping");
                continue;
            }

            self.metrics.record_dequeued(request.submitted_at.elapsed());
            let backend = Arc::clone(&self.backend);
            let payload = request.payload.clone();
            let max_output_units = request.max_output_units;
            let joined =
                tokio::task::spawn_blocking(move || backend.predict(&payload, max_output_units))
                    .await;

            let outcome = match joined {
                Ok(Ok(result)) => {
                    self.metrics.record_completed();
                    Ok(BatchedResult { result, batch_size })
                }
                Ok(Err(e)) => {
                    self.metrics.record_failed();
                    warn!(request_id = %request.id, error = %e, "Batched inference failed");
                    Err(BatcherError::Backend(e))
                }
                Err(e) => {
                    self.metrics.record_failed();
                    warn!(request_id = %request.id, error = %e, "Batched inference task failed");
                    Err(BatcherError::Backend(BackendError::inference("inference task panicked")))
                }
            };

            request.resolve(outcome);
        }
    }

    /// Resolve requests that never reached the backend with `Cancelled`
    fn cancel(&self, requests: Vec<PendingRequest>) {
        if requests.is_empty() {
            return;
        }
        info!(cancelled = requests.len(), "Cancelling undispatched requests");
        self.metrics.record_cancelled(requests.len());
        for request in requests {
            request.resolve(Err(BatcherError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedBackend, SimulationConfig};
    use crate::mode::Mode;
    use std::time::Duration;

    fn backend(config: SimulationConfig) -> Arc<dyn InferenceBackend> {
        Arc::new(SimulatedBackend::new(Mode::Baseline, config).unwrap())
    }

    fn batcher(max_batch_size: usize, max_wait_ms: u64, sim: SimulationConfig) -> Arc<Batcher> {
        let config = BatcherConfig::default()
            .with_max_batch_size(max_batch_size)
            .with_max_wait_time(Duration::from_millis(max_wait_ms));
        let batcher = Arc::new(Batcher::new(config, backend(sim)));
        batcher.start().unwrap();
        batcher
    }

    fn spawn_submit(
        batcher: &Arc<Batcher>,
        payload: String,
    ) -> JoinHandle<Result<BatchedResult, BatcherError>> {
        let batcher = Arc::clone(batcher);
        tokio::spawn(async move { batcher.submit(payload, 5).await })
    }

    #[tokio::test]
    async fn test_requests_within_window_share_one_batch() {
        let batcher = batcher(8, 300, SimulationConfig::instant());

        let handles: Vec<_> = (0..5).map(|i| spawn_submit(&batcher, format!("req-{}", i))).collect();
        for handle in handles {
            let batched = handle.await.unwrap().unwrap();
            assert_eq!(batched.batch_size, 5);
        }

        let snapshot = batcher.metrics();
        assert_eq!(snapshot.batches_processed, 1);
        assert_eq!(snapshot.deadline_flushes, 1);
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_time_triggered_flush() {
        let batcher = batcher(8, 50, SimulationConfig::instant());

        let start = Instant::now();
        let batched = batcher.submit("alone", 5).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(batched.batch_size, 1);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_count_triggered_flush() {
        let batcher = batcher(4, 5_000, SimulationConfig::instant());

        let start = Instant::now();
        let handles: Vec<_> = (0..4).map(|i| spawn_submit(&batcher, format!("req-{}", i))).collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().batch_size, 4);
        }

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(batcher.metrics().size_flushes, 1);
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_no_cross_assignment() {
        let batcher = batcher(4, 20, SimulationConfig::instant());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let payload = format!("request-{}", i);
                (payload.clone(), spawn_submit(&batcher, payload))
            })
            .collect();

        for (payload, handle) in handles {
            let batched = handle.await.unwrap().unwrap();
            assert!(
                batched.result.output.starts_with(&format!("{} ", payload)),
                "{} got {}",
                payload,
                batched.result.output
            );
            assert!(batched.batch_size >= 1 && batched.batch_size <= 4);
        }
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let batcher = batcher(8, 200, SimulationConfig::instant().with_fail_marker("boom"));

        let ok_1 = spawn_submit(&batcher, "fine one".to_string());
        let bad = spawn_submit(&batcher, "this goes boom".to_string());
        let ok_2 = spawn_submit(&batcher, "fine two".to_string());

        assert_eq!(ok_1.await.unwrap().unwrap().batch_size, 3);
        assert!(matches!(
            bad.await.unwrap(),
            Err(BatcherError::Backend(BackendError::Inference(_)))
        ));
        assert_eq!(ok_2.await.unwrap().unwrap().batch_size, 3);

        let snapshot = batcher.metrics();
        assert_eq!(snapshot.requests_completed, 2);
        assert_eq!(snapshot.requests_failed, 1);
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_queued_requests() {
        // 10 units * 20ms keeps the first request in flight while stop runs
        let slow = SimulationConfig { token_latency: Duration::from_millis(20), fail_marker: None };
        let config = BatcherConfig::default()
            .with_max_batch_size(1)
            .with_max_wait_time(Duration::ZERO);
        let batcher = Arc::new(Batcher::new(config, backend(slow)));
        batcher.start().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let batcher = Arc::clone(&batcher);
                tokio::spawn(async move { batcher.submit(format!("req-{}", i), 10).await })
            })
            .collect();

        time::sleep(Duration::from_millis(50)).await;
        batcher.stop().await;

        let mut completed = 0;
        let mut cancelled = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(BatcherError::Cancelled) => cancelled += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(cancelled, 3);
        assert_eq!(batcher.metrics().requests_cancelled, 3);
        assert!(!batcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_inside_collection_window_cancels_batch() {
        let batcher = batcher(8, 300, SimulationConfig::instant());

        let handles: Vec<_> = (0..4).map(|i| spawn_submit(&batcher, format!("req-{}", i))).collect();
        time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        batcher.stop().await;
        assert!(start.elapsed() < Duration::from_millis(200), "stop took {:?}", start.elapsed());

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(BatcherError::Cancelled));
        }
        let snapshot = batcher.metrics();
        assert_eq!(snapshot.requests_cancelled, 4);
        assert_eq!(snapshot.requests_completed, 0);
        assert_eq!(snapshot.batches_processed, 0);
        assert_eq!(snapshot.requests_queued, 0);
    }

    #[tokio::test]
    async fn test_stop_mid_batch_cancels_rest_of_batch() {
        // 10 units * 20ms keeps the first request of the batch in flight
        let slow = SimulationConfig { token_latency: Duration::from_millis(20), fail_marker: None };
        let config = BatcherConfig::default()
            .with_max_batch_size(4)
            .with_max_wait_time(Duration::from_millis(5_000));
        let batcher = Arc::new(Batcher::new(config, backend(slow)));
        batcher.start().unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let batcher_ref = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move { batcher_ref.submit(format!("req-{}", i), 10).await }));
            // keep arrival order deterministic
            time::sleep(Duration::from_millis(5)).await;
        }

        time::sleep(Duration::from_millis(50)).await;
        batcher.stop().await;

        let outcomes: Vec<_> = collect_outcomes(handles).await;
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[0].as_ref().unwrap().batch_size, 4);
        for outcome in &outcomes[1..] {
            assert_eq!(outcome, &Err(BatcherError::Cancelled));
        }
        let snapshot = batcher.metrics();
        assert_eq!(snapshot.requests_completed, 1);
        assert_eq!(snapshot.requests_cancelled, 3);
        assert_eq!(snapshot.requests_queued, 0);
    }

    async fn collect_outcomes(
        handles: Vec<JoinHandle<Result<BatchedResult, BatcherError>>>,
    ) -> Vec<Result<BatchedResult, BatcherError>> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_submit_when_not_running() {
        let batcher = Batcher::new(BatcherConfig::default(), backend(SimulationConfig::instant()));
        assert_eq!(batcher.submit("x", 1).await, Err(BatcherError::Cancelled));
    }

    #[tokio::test]
    async fn test_start_twice_and_restart() {
        let batcher = batcher(2, 10, SimulationConfig::instant());
        assert_eq!(batcher.start(), Err(BatcherError::AlreadyRunning));

        batcher.stop().await;
        assert!(batcher.submit("late", 1).await.is_err());

        batcher.start().unwrap();
        assert!(batcher.submit("again", 1).await.is_ok());
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_idle_is_prompt() {
        let batcher = batcher(8, 50, SimulationConfig::instant());
        time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        batcher.stop().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
