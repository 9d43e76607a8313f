//! Wire types for the HTTP API.
//!
//! Request bodies carry their own `validate()`; handlers call it before any
//! work is scheduled.

use modebench_core::analyzer::generate_comparison_report;
use modebench_core::{ComparisonReport, InferenceResult, Mode, ModelSize, Summary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ServerError;

pub const MAX_TEXT_CHARS: usize = 1000;
pub const MAX_NEW_TOKENS: u32 = 200;
pub const MAX_BENCHMARK_REQUESTS: u32 = 100;
pub const MAX_HISTORY_LIMIT: usize = 10_000;

pub const DEFAULT_BENCHMARK_TEXT: &str = "The future of artificial intelligence is";

fn default_mode() -> String {
    Mode::Baseline.as_str().to_string()
}

fn default_max_new_tokens() -> u32 {
    50
}

fn default_num_requests() -> u32 {
    10
}

fn default_benchmark_text() -> String {
    DEFAULT_BENCHMARK_TEXT.to_string()
}

fn default_history_limit() -> usize {
    100
}

fn validate_text(text: &str) -> Result<(), ServerError> {
    let chars = text.chars().count();
    if chars == 0 || chars > MAX_TEXT_CHARS {
        return Err(ServerError::validation(format!(
            "text must be between 1 and {} characters",
            MAX_TEXT_CHARS
        )));
    }
    Ok(())
}

fn validate_max_new_tokens(max_new_tokens: u32) -> Result<(), ServerError> {
    if !(1..=MAX_NEW_TOKENS).contains(&max_new_tokens) {
        return Err(ServerError::validation(format!(
            "max_new_tokens must be between 1 and {}",
            MAX_NEW_TOKENS
        )));
    }
    Ok(())
}

/// POST /api/inference body
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceRequest {
    pub text: String,
    /// Kept as a raw tag so an unknown mode maps to its own error
    #[serde(default = "default_mode")]
    pub optimization_mode: String,
    #[serde(default)]
    pub model_size: ModelSize,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
}

impl InferenceRequest {
    /// Check bounds and resolve the mode tag
    pub fn validate(&self) -> Result<Mode, ServerError> {
        validate_text(&self.text)?;
        validate_max_new_tokens(self.max_new_tokens)?;
        Ok(self.optimization_mode.parse::<Mode>()?)
    }
}

/// POST /api/inference response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub result: String,
    pub latency_ms: f64,
    pub tokens_per_sec: f64,
    pub tokens_generated: u32,
    pub memory_mb: f64,
    pub optimization_mode: Mode,
    pub model_size: ModelSize,
    /// Only present for batched inference
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub batch_size: Option<usize>,
}

impl InferenceResponse {
    pub fn new(
        result: InferenceResult,
        mode: Mode,
        model_size: ModelSize,
        batch_size: Option<usize>,
    ) -> Self {
        Self {
            result: result.output,
            latency_ms: round2(result.latency_ms),
            tokens_per_sec: round2(result.tokens_per_sec),
            tokens_generated: result.tokens_generated,
            memory_mb: round2(result.memory_mb),
            optimization_mode: mode,
            model_size,
            batch_size,
        }
    }
}

/// POST /api/benchmark body
#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(default = "default_num_requests")]
    pub num_requests: u32,
    #[serde(default = "default_benchmark_text")]
    pub text: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
}

impl Default for BenchmarkRequest {
    fn default() -> Self {
        Self {
            num_requests: default_num_requests(),
            text: default_benchmark_text(),
            max_new_tokens: default_max_new_tokens(),
        }
    }
}

impl BenchmarkRequest {
    pub fn validate(&self) -> Result<(), ServerError> {
        if !(1..=MAX_BENCHMARK_REQUESTS).contains(&self.num_requests) {
            return Err(ServerError::validation(format!(
                "num_requests must be between 1 and {}",
                MAX_BENCHMARK_REQUESTS
            )));
        }
        validate_text(&self.text)?;
        validate_max_new_tokens(self.max_new_tokens)
    }
}

/// GET /api/metrics/history query
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub mode: Option<String>,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl HistoryQuery {
    /// Resolve the optional mode filter and check the limit
    pub fn validate(&self) -> Result<(Option<Mode>, usize), ServerError> {
        if !(1..=MAX_HISTORY_LIMIT).contains(&self.limit) {
            return Err(ServerError::validation(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
        let mode = self.mode.as_deref().map(str::parse::<Mode>).transpose()?;
        Ok((mode, self.limit))
    }
}

/// A comparison report, or the marker rendered when no baseline exists yet
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ComparisonView {
    Report(ComparisonReport),
    Unavailable { error: String },
}

impl ComparisonView {
    pub fn from_summaries(summaries: &BTreeMap<Mode, Summary>) -> Self {
        match generate_comparison_report(summaries) {
            Ok(report) => Self::Report(report),
            Err(e) => Self::Unavailable { error: e.to_string() },
        }
    }
}

/// GET /api/metrics response
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub summaries: BTreeMap<Mode, Summary>,
    pub comparison: ComparisonView,
    pub total_inferences: usize,
}

/// Outcome of one sweep iteration
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IterationRecord {
    Success {
        iteration: u32,
        latency_ms: f64,
        tokens_per_sec: f64,
        memory_mb: f64,
    },
    Failure {
        iteration: u32,
        error: String,
    },
}

/// POST /api/benchmark response
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResponse {
    pub results: BTreeMap<Mode, Vec<IterationRecord>>,
    pub summaries: BTreeMap<Mode, Summary>,
    pub comparison: ComparisonView,
}

/// Round to 2 decimals for display
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
