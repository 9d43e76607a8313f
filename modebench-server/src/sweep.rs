//! Benchmark sweep across every mode.

use modebench_core::Mode;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::service::run_inference;
use crate::state::AppState;
use crate::types::{round2, BenchmarkRequest, IterationRecord};

/// Run `num_requests` iterations against every mode in sweep order.
///
/// Modes run one after another. A failed iteration becomes an error record
/// and the sweep carries on.
#[instrument(skip(state, request), fields(num_requests = request.num_requests))]
pub async fn run_sweep(
    state: &AppState,
    request: &BenchmarkRequest,
) -> BTreeMap<Mode, Vec<IterationRecord>> {
    let mut results = BTreeMap::new();

    for mode in Mode::SWEEP_ORDER {
        let mut records = Vec::with_capacity(request.num_requests as usize);

        for iteration in 1..=request.num_requests {
            let record =
                match run_inference(state, mode, &request.text, request.max_new_tokens).await {
                    Ok(served) => IterationRecord::Success {
                        iteration,
                        latency_ms: round2(served.result.latency_ms),
                        tokens_per_sec: round2(served.result.tokens_per_sec),
                        memory_mb: round2(served.result.memory_mb),
                    },
                    Err(e) => IterationRecord::Failure { iteration, error: e.to_string() },
                };
            records.push(record);
        }

        let failures = records
            .iter()
            .filter(|r| matches!(r, IterationRecord::Failure { .. }))
            .count();
        info!(mode = %mode, iterations = records.len(), failures, "Sweep mode complete");
        results.insert(mode, records);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppConfig;
    use modebench_core::backend::SimulationConfig;

    #[tokio::test]
    async fn test_sweep_covers_every_mode() {
        let state = AppState::from_config(AppConfig::ephemeral()).await.unwrap();
        let request = BenchmarkRequest { num_requests: 2, ..BenchmarkRequest::default() };

        let results = run_sweep(&state, &request).await;
        assert_eq!(results.len(), 5);
        for records in results.values() {
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| matches!(r, IterationRecord::Success { .. })));
        }
        assert_eq!(state.collector.len(), 10);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_survives_failures() {
        let config = AppConfig {
            simulation: SimulationConfig::instant().with_fail_marker("artificial"),
            ..AppConfig::ephemeral()
        };
        let state = AppState::from_config(config).await.unwrap();
        let request = BenchmarkRequest { num_requests: 3, ..BenchmarkRequest::default() };

        let results = run_sweep(&state, &request).await;
        assert_eq!(results.len(), 5);
        let baseline = &results[&Mode::Baseline];
        assert_eq!(baseline.len(), 3);
        assert!(matches!(baseline[2], IterationRecord::Failure { iteration: 3, .. }));
        assert!(state.collector.is_empty());
        state.shutdown().await;
    }
}
