//! Single inference endpoint.

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::error::ServerError;
use crate::service::run_inference;
use crate::state::AppState;
use crate::types::{InferenceRequest, InferenceResponse};

/// Run one inference in the requested optimization mode
///
/// POST /api/inference
pub async fn inference(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ServerError> {
    let mode = request.validate()?;

    info!(
        mode = %mode,
        model_size = request.model_size.model_name(),
        max_new_tokens = request.max_new_tokens,
        "Inference request"
    );

    let served = run_inference(&state, mode, &request.text, request.max_new_tokens).await?;

    Ok(Json(InferenceResponse::new(
        served.result,
        mode,
        request.model_size,
        served.batch_size,
    )))
}
