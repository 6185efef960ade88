use axum::response::Json;
use serde_json::{json, Value};

/// Health check handler.
pub fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
