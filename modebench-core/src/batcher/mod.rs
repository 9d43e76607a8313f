//! Adaptive request batching for modebench.
//!
//! Independently submitted requests are grouped into batches by a single
//! consumer loop and driven through one [`InferenceBackend`] that processes
//! one payload at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Concurrent submit() callers                 │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ PendingRequest + oneshot
//!                    ┌────────▼────────┐
//!                    │   FIFO queue    │ ← accepting flag under the same lock
//!                    └────────┬────────┘
//!                             │ Notify / poll_interval
//!                    ┌────────▼────────┐
//!                    │  Consumer loop  │ ← flush on max_batch_size OR deadline
//!                    └────────┬────────┘
//!                             │ one spawn_blocking call per request
//!                    ┌────────▼────────┐
//!                    │ InferenceBackend│
//!                    └─────────────────┘
//! ```
//!
//! # Scope of batching
//!
//! A batch amortizes scheduling, not compute. The backend is still invoked
//! once per request, in arrival order, and each caller is resolved with its
//! own outcome. Real throughput gains need a backend that accepts several
//! payloads per call, which this engine does not assume.
//!
//! [`InferenceBackend`]: crate::backend::InferenceBackend

mod config;
mod engine;
mod metrics;

pub use config::BatcherConfig;
pub use engine::{BatchedResult, Batcher};
pub use metrics::{BatcherMetrics, BatcherSnapshot, FlushTrigger};
