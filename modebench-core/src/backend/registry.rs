//! Explicit mode -> backend registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{InferenceBackend, SimulatedBackend, SimulationConfig};
use crate::error::{BackendError, RequestError};
use crate::mode::Mode;

/// Backends keyed by the mode they serve.
///
/// `Mode::Batched` is never registered here; batched requests are served by the
/// batcher, which holds its own handle to the baseline backend.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<Mode, Arc<dyn InferenceBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a simulated backend for every non-batched mode
    pub fn simulated(config: &SimulationConfig) -> Result<Self, BackendError> {
        let mut registry = Self::new();
        for mode in Mode::SWEEP_ORDER.into_iter().filter(|m| !m.is_batched()) {
            let backend = SimulatedBackend::new(mode, config.clone())?;
            registry
                .register(mode, Arc::new(backend))
                .map_err(|e| BackendError::load(e.to_string()))?;
        }
        Ok(registry)
    }

    /// Register the backend serving `mode`, replacing any previous one
    pub fn register(
        &mut self,
        mode: Mode,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<(), RequestError> {
        if mode.is_batched() {
            return Err(RequestError::validation("batched mode is served by the batcher"));
        }
        self.backends.insert(mode, backend);
        Ok(())
    }

    /// Backend serving `mode`
    pub fn get(&self, mode: Mode) -> Result<Arc<dyn InferenceBackend>, RequestError> {
        self.backends
            .get(&mode)
            .cloned()
            .ok_or_else(|| RequestError::UnknownMode(mode.to_string()))
    }

    /// Registered backends in mode order
    pub fn iter(&self) -> impl Iterator<Item = (Mode, &Arc<dyn InferenceBackend>)> {
        self.backends.iter().map(|(mode, backend)| (*mode, backend))
    }

    /// Modes whose backend has loaded its model
    pub fn loaded_modes(&self) -> Vec<Mode> {
        self.iter()
            .filter(|(_, backend)| backend.is_loaded())
            .map(|(mode, _)| mode)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
