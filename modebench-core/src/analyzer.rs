//! Analysis utilities for benchmark metrics.
//!
//! Pure functions over observations and [`Summary`] values: percentile
//! statistics, speedup relative to the baseline mode, and cost projection
//! from throughput. Nothing here holds state or locks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::collector::Summary;
use crate::error::AnalysisError;
use crate::mode::Mode;

/// Estimated hourly price of the serving GPU (A10G-equivalent, USD)
pub const COST_PER_GPU_HOUR: f64 = 1.50;

/// Percentiles reported by [`compute_percentiles`] when none are requested
pub const DEFAULT_PERCENTILES: [u32; 4] = [50, 90, 95, 99];

/// Arithmetic mean, 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile `p` (0..=100) of an ascending slice, by linear interpolation
/// between closest ranks (rank = p/100 * (n-1)).
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// Copy of `values` sorted ascending
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Percentile statistics for a list of values.
///
/// Keys: `mean`, `std`, `min`, `max`, and `p{N}` for every requested percentile.
/// An empty input yields an empty map.
pub fn compute_percentiles(values: &[f64], percentiles: &[u32]) -> BTreeMap<String, f64> {
    let mut stats = BTreeMap::new();
    if values.is_empty() {
        return stats;
    }

    let ordered = sorted(values);
    stats.insert("mean".to_string(), mean(&ordered));
    stats.insert("std".to_string(), std_dev(&ordered));
    stats.insert("min".to_string(), ordered[0]);
    stats.insert("max".to_string(), ordered[ordered.len() - 1]);

    for p in percentiles {
        stats.insert(format!("p{}", p), percentile(&ordered, *p as f64));
    }

    stats
}

/// Estimated cost (USD) to generate one million tokens at the given throughput.
///
/// Non-positive throughput returns `f64::INFINITY`.
pub fn estimate_cost_per_million_tokens(tokens_per_sec: f64) -> f64 {
    if tokens_per_sec <= 0.0 {
        return f64::INFINITY;
    }
    let hours_per_million = 1_000_000.0 / tokens_per_sec / 3600.0;
    round_to(hours_per_million * COST_PER_GPU_HOUR, 4)
}

/// Speedup of `candidate_latency` relative to `baseline_latency`, rounded to 2 decimals.
///
/// A non-positive candidate latency returns `0.0`. That value means
/// "unmeasurable", not "no speedup"; consumers must not read it as a ratio.
pub fn compute_speedup(baseline_latency: f64, candidate_latency: f64) -> f64 {
    if candidate_latency <= 0.0 {
        return 0.0;
    }
    round_to(baseline_latency / candidate_latency, 2)
}

/// One row of a [`ComparisonReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeComparison {
    #[serde(flatten)]
    pub summary: Summary,
    pub speedup: f64,
    /// `null` on the wire when throughput was zero
    pub estimated_cost_per_1m_tokens: f64,
}

/// Cross-mode comparison against the baseline mode
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComparisonReport {
    pub modes: BTreeMap<Mode, ModeComparison>,
}

impl ComparisonReport {
    pub fn get(&self, mode: Mode) -> Option<&ModeComparison> {
        self.modes.get(&mode)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

/// Build a comparison report across every mode with at least one observation.
///
/// Fails with [`AnalysisError::ComparisonUnavailable`] when the baseline mode
/// is absent or has no observations; no partial report is produced.
pub fn generate_comparison_report(
    summaries: &BTreeMap<Mode, Summary>,
) -> Result<ComparisonReport, AnalysisError> {
    let baseline_latency = summaries
        .get(&Mode::Baseline)
        .filter(|s| s.count > 0)
        .and_then(|s| s.latency.as_ref())
        .map(|l| l.mean)
        .ok_or(AnalysisError::ComparisonUnavailable)?;

    let modes = summaries
        .iter()
        .filter(|(_, summary)| summary.count > 0)
        .filter_map(|(mode, summary)| {
            let latency = summary.latency.as_ref()?;
            let throughput = summary.throughput.as_ref()?;
            Some((
                *mode,
                ModeComparison {
                    summary: summary.clone(),
                    speedup: compute_speedup(baseline_latency, latency.mean),
                    estimated_cost_per_1m_tokens: estimate_cost_per_million_tokens(
                        throughput.mean_tokens_per_sec,
                    ),
                },
            ))
        })
        .collect();

    Ok(ComparisonReport { modes })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
