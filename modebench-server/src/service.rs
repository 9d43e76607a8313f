//! Inference execution shared by the single-request and sweep endpoints.

use modebench_core::{InferenceResult, Mode, Observation};
use tracing::{debug, instrument, warn};

use crate::error::ServerError;
use crate::metrics::InferenceTimer;
use crate::state::AppState;

/// Result of one served inference
#[derive(Debug, Clone)]
pub struct Served {
    pub result: InferenceResult,
    /// Set when the request went through the batcher
    pub batch_size: Option<usize>,
}

/// Run one inference in `mode` and record it.
///
/// Batched requests go through the batcher; every other mode calls its
/// backend directly on the blocking pool. A success is written to the
/// collector and handed to the durable store.
#[instrument(skip(state, text))]
pub async fn run_inference(
    state: &AppState,
    mode: Mode,
    text: &str,
    max_new_tokens: u32,
) -> Result<Served, ServerError> {
    let timer = InferenceTimer::new(mode);

    let served = if mode.is_batched() {
        state
            .batcher
            .submit(text, max_new_tokens)
            .await
            .map(|batched| Served { result: batched.result, batch_size: Some(batched.batch_size) })
            .map_err(|e| ServerError::batcher(mode, e))
    } else {
        direct(state, mode, text, max_new_tokens).await
    };

    match served {
        Ok(served) => {
            timer.record_success(served.result.tokens_generated, served.result.tokens_per_sec);
            record(state, mode, &served.result).await;
            debug!(latency_ms = served.result.latency_ms, "Inference complete");
            Ok(served)
        }
        Err(e) => {
            timer.record_failure();
            warn!(error = %e, "Inference failed");
            Err(e)
        }
    }
}

async fn direct(
    state: &AppState,
    mode: Mode,
    text: &str,
    max_new_tokens: u32,
) -> Result<Served, ServerError> {
    let backend = state.registry.get(mode)?;
    let payload = text.to_string();

    let result = tokio::task::spawn_blocking(move || backend.predict(&payload, max_new_tokens))
        .await
        .map_err(|e| ServerError::internal(format!("inference task failed: {}", e)))?
        .map_err(|e| ServerError::backend(mode, e))?;

    Ok(Served { result, batch_size: None })
}

/// Two independent writes: in-memory collector, then the durable log.
async fn record(state: &AppState, mode: Mode, result: &InferenceResult) {
    let observation = Observation::from_result(mode, result);
    state.collector.record(observation.clone());
    state.store.append(observation).await;
}
