//! Axum handlers for the admin API.

pub mod cache;
pub mod journal;
pub mod mode;
pub mod simulation;
pub mod state;

use axum::response::Json;
use serde_json::{Value, json};

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
