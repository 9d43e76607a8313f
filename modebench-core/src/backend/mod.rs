//! Inference backend contract.
//!
//! The core never executes a model itself. It depends on [`InferenceBackend`],
//! which exposes two required capabilities (`load`, `infer`) plus a provided,
//! instrumented [`InferenceBackend::predict`] that measures latency, throughput
//! and memory the same way for every backend.
//!
//! `infer` is synchronous and processes one payload at a time. Async callers
//! must run it off the executor (`tokio::task::spawn_blocking`).

mod registry;
mod simulated;

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::BackendError;
use crate::mode::Mode;

pub use registry::BackendRegistry;
pub use simulated::{SimulatedBackend, SimulationConfig};

/// Result from a single instrumented inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Generated text
    pub output: String,
    /// Wall time spent inside `infer`, in milliseconds
    pub latency_ms: f64,
    /// Number of output units produced
    pub tokens_generated: u32,
    /// Resident memory of the serving process after the call
    pub memory_mb: f64,
    /// `tokens_generated / elapsed`, 0 when elapsed is zero
    pub tokens_per_sec: f64,
}

/// Metadata about a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub optimization_mode: Mode,
    pub parameter_count: u64,
    pub model_size_mb: f64,
    pub device: String,
    pub dtype: String,
}

/// Contract every inference backend implements.
pub trait InferenceBackend: Send + Sync {
    /// Load and prepare the model. Must be idempotent.
    fn load(&self) -> Result<(), BackendError>;

    /// Whether `load` has completed successfully
    fn is_loaded(&self) -> bool;

    /// Execute one inference, returning the generated text and unit count.
    fn infer(&self, payload: &str, max_output_units: u32) -> Result<(String, u32), BackendError>;

    /// Describe the model behind this backend
    fn describe(&self) -> ModelDescriptor;

    /// Current memory footprint in MB.
    ///
    /// Reports the absolute resident size of the process rather than a
    /// before/after delta, which reads as zero for most single calls.
    fn memory_mb(&self) -> f64 {
        process_memory_mb()
    }

    /// Run inference with full instrumentation, loading the model on first use.
    fn predict(&self, payload: &str, max_output_units: u32) -> Result<InferenceResult, BackendError> {
        if !self.is_loaded() {
            self.load()?;
        }

        let start = Instant::now();
        let (output, tokens_generated) = self.infer(payload, max_output_units)?;
        let elapsed = start.elapsed().as_secs_f64();

        let tokens_per_sec = if elapsed > 0.0 {
            tokens_generated as f64 / elapsed
        } else {
            0.0
        };

        Ok(InferenceResult {
            output,
            latency_ms: elapsed * 1000.0,
            tokens_generated,
            memory_mb: self.memory_mb(),
            tokens_per_sec,
        })
    }

    /// Warm up the model with short dummy calls
    fn warmup(&self, runs: usize) -> Result<(), BackendError> {
        tracing::info!(runs, model = %self.describe().name, "Warming up backend");
        for _ in 0..runs {
            self.predict("Hello world", 10)?;
        }
        Ok(())
    }
}

/// Resident memory of the current process in MB, 0.0 if unavailable.
pub fn process_memory_mb() -> f64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    let mut sys = sysinfo::System::new();
    if !sys.refresh_process(pid) {
        return 0.0;
    }
    sys.process(pid)
        .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingBackend {
        loaded: AtomicBool,
        loads: AtomicU32,
    }

    impl InferenceBackend for CountingBackend {
        fn load(&self) -> Result<(), BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        fn infer(&self, payload: &str, max_output_units: u32) -> Result<(String, u32), BackendError> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok((payload.to_uppercase(), max_output_units))
        }

        fn describe(&self) -> ModelDescriptor {
            ModelDescriptor {
                name: "counting".to_string(),
                optimization_mode: Mode::Baseline,
                parameter_count: 0,
                model_size_mb: 0.0,
                device: "cpu".to_string(),
                dtype: "float32".to_string(),
            }
        }

        fn memory_mb(&self) -> f64 {
            42.0
        }
    }

    #[test]
    fn test_predict_loads_once_and_instruments() {
        let backend = CountingBackend { loaded: AtomicBool::new(false), loads: AtomicU32::new(0) };

        let result = backend.predict("abc", 20).unwrap();
        assert_eq!(result.output, "ABC");
        assert_eq!(result.tokens_generated, 20);
        assert_eq!(result.memory_mb, 42.0);
        assert!(result.latency_ms >= 5.0);
        assert!(result.tokens_per_sec > 0.0);

        backend.predict("again", 1).unwrap();
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_warmup_runs_predict() {
        let backend = CountingBackend { loaded: AtomicBool::new(false), loads: AtomicU32::new(0) };
        backend.warmup(2).unwrap();
        assert!(backend.is_loaded());
    }

    #[test]
    fn test_process_memory_is_non_negative() {
        assert!(process_memory_mb() >= 0.0);
    }
}
