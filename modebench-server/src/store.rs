//! Durable observation log.
//!
//! A single actor task owns the sink and serializes every write; request
//! handlers hold a cheap cloneable [`ObservationStore`] handle and talk to
//! it over a bounded command channel. `append` waits for channel capacity,
//! so a slow sink pushes back on callers instead of losing rows. Only a
//! failed write (or a closed actor) drops an observation, and that is logged
//! and counted rather than reported to the inference caller.
//!
//! The file sink keeps no rows in memory: history queries stream the log
//! from disk and keep only the newest `limit` matches.
//!
//! The collector and this store are written independently for every
//! observation, so a crash between the two writes can lose either copy.

use modebench_core::{Mode, Observation};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::types::MAX_HISTORY_LIMIT;

/// Default location of the JSON-lines log
pub const DEFAULT_STORE_PATH: &str = "data/metrics.jsonl";

/// Pending commands before `append` starts waiting
const COMMAND_BUFFER: usize = 1024;

/// Rows retained by the in-memory sink
const MEMORY_CAPACITY: usize = MAX_HISTORY_LIMIT;

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The writer task is gone
    #[error("Store writer closed")]
    Closed,
}

/// One persisted row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObservation {
    pub id: u64,
    #[serde(flatten)]
    pub observation: Observation,
}

enum Command {
    Append(Observation),
    History {
        mode: Option<Mode>,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<StoredObservation>, StoreError>>,
    },
    Count {
        reply: oneshot::Sender<u64>,
    },
}

enum Sink {
    /// Newest rows only, oldest evicted first
    Memory(VecDeque<StoredObservation>),
    File { path: PathBuf, file: File },
}

/// Handle to the single-writer store actor
#[derive(Clone)]
pub struct ObservationStore {
    tx: mpsc::Sender<Command>,
    write_errors: Arc<AtomicU64>,
}

impl ObservationStore {
    /// Store that keeps recent rows in memory only. Must be called inside a tokio runtime.
    pub fn in_memory() -> Self {
        Self::spawn(Sink::Memory(VecDeque::new()), 0, 1)
    }

    /// Open (or create) a JSON-lines log at `path`, picking up its row count and ids.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut rows = 0u64;
        let mut max_id = 0u64;
        let skipped = scan_rows(&path, |row| {
            rows += 1;
            max_id = max_id.max(row.id);
        })
        .await?;
        if skipped > 0 {
            warn!(skipped, "Skipping unreadable store rows");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        info!(rows, "Opened observation store");

        Ok(Self::spawn(Sink::File { path, file }, rows, max_id + 1))
    }

    fn spawn(sink: Sink, row_count: u64, next_id: u64) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let write_errors = Arc::new(AtomicU64::new(0));

        let actor = StoreActor {
            sink,
            row_count,
            next_id,
            write_errors: Arc::clone(&write_errors),
        };
        tokio::spawn(actor.run(rx));

        Self { tx, write_errors }
    }

    /// Hand an observation to the writer, waiting while the channel is full.
    pub async fn append(&self, observation: Observation) {
        if self.tx.send(Command::Append(observation)).await.is_err() {
            warn!("Dropping observation, store writer closed");
            self.record_write_error();
        }
    }

    /// Persisted rows, newest first, optionally filtered by mode.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        mode: Option<Mode>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::History { mode, limit, reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Total rows stored
    pub async fn count(&self) -> Result<u64, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Count { reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Observations that never reached the sink
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_store_write_error();
    }
}

struct StoreActor {
    sink: Sink,
    row_count: u64,
    next_id: u64,
    write_errors: Arc<AtomicU64>,
}

impl StoreActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append(observation) => self.append(observation).await,
                Command::History { mode, limit, reply } => {
                    let _ = reply.send(self.history(mode, limit).await);
                }
                Command::Count { reply } => {
                    let _ = reply.send(self.row_count);
                }
            }
        }
        debug!("Store writer exiting");
    }

    async fn append(&mut self, observation: Observation) {
        let row = StoredObservation { id: self.next_id, observation };
        let id = row.id;

        if let Err(e) = self.persist(row).await {
            warn!(id, error = %e, "Failed to persist observation");
            self.write_errors.fetch_add(1, Ordering::Relaxed);
            metrics::record_store_write_error();
            return;
        }

        self.next_id += 1;
        self.row_count += 1;
    }

    async fn persist(&mut self, row: StoredObservation) -> Result<(), StoreError> {
        match &mut self.sink {
            Sink::Memory(rows) => {
                if rows.len() >= MEMORY_CAPACITY {
                    rows.pop_front();
                }
                rows.push_back(row);
                Ok(())
            }
            Sink::File { path, file } => {
                let mut line = serde_json::to_vec(&row)?;
                line.push(b'\n');
                file.write_all(&line).await?;
                file.flush().await?;
                debug!(id = row.id, path = %path.display(), "Observation persisted");
                Ok(())
            }
        }
    }

    async fn history(
        &self,
        mode: Option<Mode>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let mut newest = Newest::new(limit);
        match &self.sink {
            Sink::Memory(rows) => {
                for row in rows.iter().filter(|r| matches_mode(r, mode)) {
                    newest.offer(row.clone());
                }
            }
            Sink::File { path, .. } => {
                scan_rows(path, |row| {
                    if matches_mode(&row, mode) {
                        newest.offer(row);
                    }
                })
                .await?;
            }
        }
        Ok(newest.into_vec())
    }
}

fn matches_mode(row: &StoredObservation, mode: Option<Mode>) -> bool {
    mode.map_or(true, |m| row.observation.mode == m)
}

fn newest_first(a: &StoredObservation, b: &StoredObservation) -> CmpOrdering {
    b.observation
        .timestamp
        .total_cmp(&a.observation.timestamp)
        .then_with(|| b.id.cmp(&a.id))
}

/// Heap entry ordered so the oldest kept row sits on top
struct Ranked(StoredObservation);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        newest_first(&self.0, &other.0)
    }
}

/// Keeps the newest `limit` rows offered to it
struct Newest {
    limit: usize,
    heap: BinaryHeap<Ranked>,
}

impl Newest {
    fn new(limit: usize) -> Self {
        Self { limit, heap: BinaryHeap::with_capacity(limit.saturating_add(1).min(MAX_HISTORY_LIMIT + 1)) }
    }

    fn offer(&mut self, row: StoredObservation) {
        if self.limit == 0 {
            return;
        }
        self.heap.push(Ranked(row));
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    fn into_vec(self) -> Vec<StoredObservation> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

/// Stream every readable row of the log at `path` into `visit`.
///
/// A missing file reads as empty. Returns the number of unreadable lines.
async fn scan_rows(
    path: &Path,
    mut visit: impl FnMut(StoredObservation),
) -> Result<usize, StoreError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut skipped = 0;
    let mut n = 0usize;
    while let Some(line) = lines.next_line().await? {
        n += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(row) => visit(row),
            Err(e) => {
                debug!(line = n, error = %e, "Unreadable store row");
                skipped += 1;
            }
        }
    }
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(mode: Mode, timestamp: f64) -> Observation {
        Observation::at(mode, 10.0, 100.0, 400.0, 5, timestamp)
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = ObservationStore::in_memory();
        store.append(obs(Mode::Baseline, 100.0)).await;
        store.append(obs(Mode::Onnx, 300.0)).await;
        store.append(obs(Mode::Baseline, 200.0)).await;

        let rows = store.history(None, 10).await.unwrap();
        let stamps: Vec<f64> = rows.iter().map(|r| r.observation.timestamp).collect();
        assert_eq!(stamps, vec![300.0, 200.0, 100.0]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_history_filter_and_limit() {
        let store = ObservationStore::in_memory();
        for i in 0..5 {
            store.append(obs(Mode::Baseline, i as f64)).await;
            store.append(obs(Mode::Quantized, i as f64)).await;
        }

        let rows = store.history(Some(Mode::Quantized), 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.observation.mode == Mode::Quantized));
        assert_eq!(rows[0].observation.timestamp, 4.0);
        assert_eq!(rows[1].observation.timestamp, 3.0);
    }

    #[tokio::test]
    async fn test_equal_timestamps_order_by_id() {
        let store = ObservationStore::in_memory();
        store.append(obs(Mode::Baseline, 50.0)).await;
        store.append(obs(Mode::Baseline, 50.0)).await;

        let rows = store.history(None, 10).await.unwrap();
        assert!(rows[0].id > rows[1].id);
    }

    #[tokio::test]
    async fn test_burst_of_appends_is_not_dropped() {
        let store = ObservationStore::in_memory();
        for i in 0..2_000 {
            store.append(obs(Mode::Onnx, i as f64)).await;
        }

        assert_eq!(store.count().await.unwrap(), 2_000);
        assert_eq!(store.write_errors(), 0);
        assert_eq!(store.history(None, 1).await.unwrap()[0].observation.timestamp, 1_999.0);
    }

    #[tokio::test]
    async fn test_memory_sink_is_bounded() {
        let store = ObservationStore::in_memory();
        for i in 0..(MEMORY_CAPACITY + 5) {
            store.append(obs(Mode::Baseline, i as f64)).await;
        }

        assert_eq!(store.count().await.unwrap(), (MEMORY_CAPACITY + 5) as u64);
        let rows = store.history(None, MAX_HISTORY_LIMIT).await.unwrap();
        assert_eq!(rows.len(), MEMORY_CAPACITY);
        assert_eq!(rows.last().unwrap().observation.timestamp, 5.0);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.jsonl");

        let store = ObservationStore::open(&path).await.unwrap();
        store.append(obs(Mode::Baseline, 1.0)).await;
        store.append(obs(Mode::Onnx, 2.0)).await;
        assert_eq!(store.count().await.unwrap(), 2);
        drop(store);

        let reopened = ObservationStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);

        reopened.append(obs(Mode::Baseline, 3.0)).await;
        let rows = reopened.history(None, 10).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, 3);
        assert_eq!(rows[1].observation.mode, Mode::Onnx);
        assert_eq!(rows[2].observation.mode, Mode::Baseline);
    }

    #[tokio::test]
    async fn test_file_history_filter_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObservationStore::open(dir.path().join("metrics.jsonl")).await.unwrap();
        for i in 0..6 {
            let mode = if i % 2 == 0 { Mode::Onnx } else { Mode::Quantized };
            store.append(obs(mode, i as f64)).await;
        }

        let rows = store.history(Some(Mode::Onnx), 2).await.unwrap();
        let stamps: Vec<f64> = rows.iter().map(|r| r.observation.timestamp).collect();
        assert_eq!(stamps, vec![4.0, 2.0]);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let good = serde_json::to_string(&StoredObservation { id: 7, observation: obs(Mode::Onnx, 9.0) })
            .unwrap();
        std::fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        let store = ObservationStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.append(obs(Mode::Onnx, 10.0)).await;
        let rows = store.history(None, 1).await.unwrap();
        assert_eq!(rows[0].id, 8);
    }

    #[tokio::test]
    async fn test_failed_write_is_counted_and_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        std::fs::write(&path, "").unwrap();

        // Read-only handle: every write to it fails
        let file = File::open(&path).await.unwrap();
        let store = ObservationStore::spawn(Sink::File { path: path.clone(), file }, 0, 1);

        store.append(obs(Mode::Baseline, 1.0)).await;

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.write_errors(), 1);
        assert!(store.history(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_after_writer_closed_is_counted() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let store = ObservationStore { tx, write_errors: Arc::new(AtomicU64::new(0)) };

        store.append(obs(Mode::Onnx, 1.0)).await;
        assert_eq!(store.write_errors(), 1);
        assert!(matches!(store.count().await, Err(StoreError::Closed)));
    }

    #[test]
    fn test_row_wire_format_is_flat() {
        let row = StoredObservation { id: 1, observation: obs(Mode::Baseline, 5.0) };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["mode"], "baseline");
        assert_eq!(json["latency_ms"], 10.0);
    }
}
