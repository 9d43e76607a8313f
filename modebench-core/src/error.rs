//! Error types for modebench core library
//!
//! This module provides structured error types using `thiserror` for
//! type-safe error handling across the library.
//!
//! # Error Hierarchy
//!
//! ```text
//! RequestError   - Rejected at the boundary, before any work begins
//! BackendError   - The inference backend itself failed
//! BatcherError   - Batching engine failures (wraps BackendError)
//! AnalysisError  - Derived reports that cannot be produced yet
//! ```
//!
//! Application code should use `anyhow` with context:
//!
//! ```rust,ignore
//! use anyhow::Context;
//!
//! batcher.start().context("Failed to start batcher")?;
//! ```

use thiserror::Error;

/// Errors raised while validating an incoming request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Malformed or out-of-range input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Mode tag is not registered
    #[error("Unknown optimization mode: {0}")]
    UnknownMode(String),
}

impl RequestError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Errors raised by an inference backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Model could not be loaded
    #[error("Model load failed: {0}")]
    Load(String),

    /// Inference call failed
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl BackendError {
    /// Create a load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create an inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}

/// Errors raised by the batching engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatcherError {
    /// The backend failed while processing this request
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The engine was stopped before the request was dispatched
    #[error("Request cancelled: batcher stopped before dispatch")]
    Cancelled,

    /// `start()` was called on a running engine
    #[error("Batcher is already running")]
    AlreadyRunning,
}

/// Errors raised by the analyzer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// No baseline observations exist yet
    #[error("No baseline metrics available for comparison")]
    ComparisonUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RequestError::validation("text must not be empty");
        assert_eq!(err.to_string(), "Validation failed: text must not be empty");

        let err = BackendError::inference("out of memory");
        assert_eq!(err.to_string(), "Inference failed: out of memory");

        let err = AnalysisError::ComparisonUnavailable;
        assert_eq!(err.to_string(), "No baseline metrics available for comparison");
    }

    #[test]
    fn test_backend_error_passes_through_batcher() {
        let err: BatcherError = BackendError::load("weights missing").into();
        assert_eq!(err.to_string(), "Model load failed: weights missing");
        assert!(matches!(err, BatcherError::Backend(BackendError::Load(_))));
    }
}
