//! Deterministic stand-in backend.
//!
//! Produces repeatable text and spends a configurable amount of wall time per
//! output unit, scaled by a per-mode speed factor. Used as the default backend
//! for every mode and throughout the test suites.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{InferenceBackend, ModelDescriptor};
use crate::error::BackendError;
use crate::mode::Mode;

const MODEL_NAME: &str = "gpt2";
const PARAMETER_COUNT: u64 = 124_439_808;

const VOCAB: [&str; 16] = [
    "the", "model", "runs", "fast", "and", "latency", "drops", "while", "throughput", "grows",
    "across", "every", "batch", "of", "tokens", "today",
];

/// Tuning for simulated backends
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Wall time spent per output unit at speed factor 1.0
    pub token_latency: Duration,
    /// Payloads containing this marker fail with `BackendError::Inference`
    pub fail_marker: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { token_latency: Duration::from_millis(4), fail_marker: None }
    }
}

impl SimulationConfig {
    /// Configuration with no simulated compute time, for tests
    pub fn instant() -> Self {
        Self { token_latency: Duration::ZERO, fail_marker: None }
    }

    /// Create config from environment variables
    ///
    /// - `MODEBENCH_TOKEN_LATENCY_MS`: per-unit latency (default: 4)
    /// - `MODEBENCH_FAIL_MARKER`: failure injection marker (default: unset)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MODEBENCH_TOKEN_LATENCY_MS") {
            if let Ok(ms) = val.parse() {
                config.token_latency = Duration::from_millis(ms);
            }
        }

        config.fail_marker = std::env::var("MODEBENCH_FAIL_MARKER")
            .ok()
            .filter(|m| !m.is_empty());

        config
    }

    /// Builder: fail every payload containing `marker`
    pub fn with_fail_marker(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct ModeProfile {
    speed_factor: f64,
    dtype: &'static str,
    size_mb: f64,
}

fn profile_for(mode: Mode) -> Option<ModeProfile> {
    let profile = match mode {
        Mode::Baseline => ModeProfile { speed_factor: 1.0, dtype: "float32", size_mb: 474.70 },
        Mode::Quantized => ModeProfile { speed_factor: 0.6, dtype: "qint8", size_mb: 165.24 },
        Mode::Torchscript => ModeProfile { speed_factor: 0.85, dtype: "float32", size_mb: 474.70 },
        Mode::Onnx => ModeProfile { speed_factor: 0.5, dtype: "float32", size_mb: 474.70 },
        Mode::Batched => return None,
    };
    Some(profile)
}

/// Simulated backend for one optimization mode
pub struct SimulatedBackend {
    mode: Mode,
    profile: ModeProfile,
    config: SimulationConfig,
    loaded: AtomicBool,
    load_lock: Mutex<()>,
}

impl SimulatedBackend {
    /// Create a backend for `mode`.
    ///
    /// `Mode::Batched` has no backend of its own and is rejected.
    pub fn new(mode: Mode, config: SimulationConfig) -> Result<Self, BackendError> {
        let profile = profile_for(mode)
            .ok_or_else(|| BackendError::load(format!("mode '{}' has no dedicated backend", mode)))?;

        info!(mode = %mode, model = MODEL_NAME, "Initializing simulated backend");

        Ok(Self { mode, profile, config, loaded: AtomicBool::new(false), load_lock: Mutex::new(()) })
    }

    fn compute_time(&self, units: u32) -> Duration {
        self.config.token_latency.mul_f64(units as f64 * self.profile.speed_factor)
    }

    fn generate(payload: &str, units: u32) -> String {
        let seed = payload
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));

        let mut text = String::from(payload);
        for i in 0..units as usize {
            text.push(' ');
            text.push_str(VOCAB[(seed + i * 7) % VOCAB.len()]);
        }
        text
    }
}

impl InferenceBackend for SimulatedBackend {
    fn load(&self) -> Result<(), BackendError> {
        let _guard = self.load_lock.lock();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        self.loaded.store(true, Ordering::Release);
        info!(mode = %self.mode, dtype = self.profile.dtype, "Simulated model loaded");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn infer(&self, payload: &str, max_output_units: u32) -> Result<(String, u32), BackendError> {
        if let Some(marker) = &self.config.fail_marker {
            if payload.contains(marker.as_str()) {
                return Err(BackendError::inference(format!(
                    "simulated failure for payload containing '{}'",
                    marker
                )));
            }
        }

        let compute = self.compute_time(max_output_units);
        if !compute.is_zero() {
            std::thread::sleep(compute);
        }

        debug!(mode = %self.mode, units = max_output_units, "Simulated inference complete");
        Ok((Self::generate(payload, max_output_units), max_output_units))
    }

    fn describe(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: MODEL_NAME.to_string(),
            optimization_mode: self.mode,
            parameter_count: PARAMETER_COUNT,
            model_size_mb: self.profile.size_mb,
            device: "cpu".to_string(),
            dtype: self.profile.dtype.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batched_has_no_backend() {
        assert!(SimulatedBackend::new(Mode::Batched, SimulationConfig::instant()).is_err());
    }

    #[test]
    fn test_lazy_load() {
        let backend = SimulatedBackend::new(Mode::Onnx, SimulationConfig::instant()).unwrap();
        assert!(!backend.is_loaded());
        backend.predict("hi", 3).unwrap();
        assert!(backend.is_loaded());
    }

    #[test]
    fn test_deterministic_output() {
        let backend = SimulatedBackend::new(Mode::Baseline, SimulationConfig::instant()).unwrap();
        let (a, units) = backend.infer("The future of", 5).unwrap();
        let (b, _) = backend.infer("The future of", 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(units, 5);
        assert!(a.starts_with("The future of "));
        assert_eq!(a.split_whitespace().count(), 3 + 5);
    }

    #[test]
    fn test_fail_marker() {
        let config = SimulationConfig::instant().with_fail_marker("boom");
        let backend = SimulatedBackend::new(Mode::Baseline, config).unwrap();
        assert!(backend.infer("all good", 2).is_ok());
        let err = backend.infer("this goes boom", 2).unwrap_err();
        assert!(matches!(err, BackendError::Inference(_)));
    }

    #[test]
    fn test_speed_factor_scales_compute_time() {
        let config = SimulationConfig { token_latency: Duration::from_millis(10), fail_marker: None };
        let baseline = SimulatedBackend::new(Mode::Baseline, config.clone()).unwrap();
        let onnx = SimulatedBackend::new(Mode::Onnx, config).unwrap();
        assert_eq!(baseline.compute_time(10), Duration::from_millis(100));
        assert_eq!(onnx.compute_time(10), Duration::from_millis(50));
    }

    #[test]
    fn test_describe() {
        let backend = SimulatedBackend::new(Mode::Quantized, SimulationConfig::instant()).unwrap();
        let desc = backend.describe();
        assert_eq!(desc.name, "gpt2");
        assert_eq!(desc.dtype, "qint8");
        assert_eq!(desc.optimization_mode, Mode::Quantized);
        assert_eq!(desc.parameter_count, PARAMETER_COUNT);
    }
}
