// modebench Core Library
//
// Request batching, metrics collection and comparative analysis for
// benchmarking inference optimization modes.

pub mod analyzer;
pub mod backend;
pub mod batcher;
pub mod collector;
pub mod error;
pub mod mode;

pub use analyzer::{ComparisonReport, ModeComparison};
pub use backend::{BackendRegistry, InferenceBackend, InferenceResult, ModelDescriptor};
pub use batcher::{BatchedResult, Batcher, BatcherConfig};
pub use collector::{MetricsCollector, Observation, Summary};
pub use error::{AnalysisError, BackendError, BatcherError, RequestError};
pub use mode::{Mode, ModelSize};
