//! State bag handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct StateView {
    pub state: HashMap<String, String>,
}

#[tracing::instrument(skip_all)]
pub async fn get_state(State(state): State<AppState>) -> Json<StateView> {
    Json(StateView {
        state: state.store.state.snapshot(),
    })
}

/// Replace the entire state bag.
#[tracing::instrument(skip_all)]
pub async fn put_state(State(state): State<AppState>, Json(body): Json<StateView>) -> Json<StateView> {
    state.store.state.clear();
    for (key, value) in body.state {
        state.store.state.set(key, value);
    }
    Json(StateView {
        state: state.store.state.snapshot(),
    })
}

#[tracing::instrument(skip_all)]
pub async fn delete_state(State(state): State<AppState>) -> StatusCode {
    state.store.state.clear();
    StatusCode::OK
}
