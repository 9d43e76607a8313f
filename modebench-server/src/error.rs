//! Error types for the modebench server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use modebench_core::{BackendError, BatcherError, Mode, RequestError};
use serde_json::json;

use crate::store::StoreError;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed or out-of-range input, rejected before any work
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Mode tag is not registered
    #[error("Unknown optimization mode: {0}")]
    UnknownMode(String),

    /// The inference backend failed; message passed through
    #[error("{message}")]
    Backend { mode: Option<Mode>, message: String },

    /// Batcher stopped before the request was dispatched
    #[error("Request cancelled: batcher stopped before dispatch")]
    Cancelled { mode: Option<Mode> },

    /// Durable store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Backend failure while serving `mode`
    pub fn backend(mode: Mode, error: BackendError) -> Self {
        Self::Backend { mode: Some(mode), message: error.to_string() }
    }

    /// Batcher failure while serving `mode`
    pub fn batcher(mode: Mode, error: BatcherError) -> Self {
        match error {
            BatcherError::Backend(e) => Self::backend(mode, e),
            BatcherError::Cancelled => Self::Cancelled { mode: Some(mode) },
            BatcherError::AlreadyRunning => Self::internal(error.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::UnknownMode(_) => StatusCode::BAD_REQUEST,
            ServerError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error type tag used in response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Validation(_) => "validation_error",
            ServerError::UnknownMode(_) => "unknown_mode",
            ServerError::Backend { .. } => "backend_error",
            ServerError::Cancelled { .. } => "cancelled",
            ServerError::Store(_) => "store_error",
            ServerError::Internal(_) => "internal_error",
        }
    }

    fn mode(&self) -> Option<Mode> {
        match self {
            ServerError::Backend { mode, .. } | ServerError::Cancelled { mode } => *mode,
            _ => None,
        }
    }
}

impl From<RequestError> for ServerError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::Validation(msg) => Self::Validation(msg),
            RequestError::UnknownMode(tag) => Self::UnknownMode(tag),
        }
    }
}

impl From<BackendError> for ServerError {
    fn from(error: BackendError) -> Self {
        Self::Backend { mode: None, message: error.to_string() }
    }
}

impl From<BatcherError> for ServerError {
    fn from(error: BatcherError) -> Self {
        match error {
            BatcherError::Backend(e) => e.into(),
            BatcherError::Cancelled => Self::Cancelled { mode: None },
            BatcherError::AlreadyRunning => Self::internal(error.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "message": self.to_string(),
            "type": self.kind(),
        });
        if let Some(mode) = self.mode() {
            error["mode"] = json!(mode);
        }

        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerError::validation("x").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ServerError::from(RequestError::UnknownMode("fast".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::batcher(Mode::Batched, BatcherError::Cancelled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::backend(Mode::Onnx, BackendError::inference("oom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_message_passes_through() {
        let err = ServerError::batcher(
            Mode::Batched,
            BatcherError::Backend(BackendError::inference("CUDA out of memory")),
        );
        assert_eq!(err.to_string(), "Inference failed: CUDA out of memory");
        assert_eq!(err.mode(), Some(Mode::Batched));
        assert_eq!(err.kind(), "backend_error");
    }
}
