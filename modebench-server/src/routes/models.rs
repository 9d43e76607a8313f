//! Backend inventory endpoint.

use axum::{extract::State, Json};
use modebench_core::Mode;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::state::AppState;

/// Per-mode backend status. Unloaded modes report `not_loaded`.
///
/// GET /api/models
pub async fn models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut inventory = Map::new();

    for mode in Mode::SWEEP_ORDER {
        let entry = if mode.is_batched() {
            json!({
                "type": "dynamic_batcher",
                "status": if state.batcher.is_running() { "active" } else { "stopped" },
                "max_batch_size": state.batcher.config().max_batch_size,
                "max_wait_ms": state.batcher.config().max_wait_time.as_millis() as u64,
            })
        } else {
            match state.registry.get(mode) {
                Ok(backend) => {
                    let info = backend.describe();
                    if backend.is_loaded() {
                        json!({
                            "name": info.name,
                            "parameter_count": info.parameter_count,
                            "model_size_mb": info.model_size_mb,
                            "device": info.device,
                            "dtype": info.dtype,
                            "status": "loaded",
                        })
                    } else {
                        json!({ "name": info.name, "status": "not_loaded" })
                    }
                }
                Err(_) => json!({ "name": mode.as_str(), "status": "not_loaded" }),
            }
        };
        inventory.insert(mode.as_str().to_string(), entry);
    }

    Json(Value::Object(inventory))
}
