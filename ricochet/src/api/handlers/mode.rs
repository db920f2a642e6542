//! Mode handlers: read and drive the dispatcher's state machine.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::errors::{Error, Result};
use crate::modes::Mode;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeView {
    pub mode: Mode,
}

#[tracing::instrument(skip_all)]
pub async fn get_mode(State(state): State<AppState>) -> Json<ModeView> {
    Json(ModeView {
        mode: state.dispatcher.mode(),
    })
}

#[tracing::instrument(skip_all)]
pub async fn set_mode(State(state): State<AppState>, Json(body): Json<ModeView>) -> Result<Json<ModeView>> {
    // Middleware-driven modes are unusable without middleware; reject the
    // transition instead of 502ing every subsequent request.
    if matches!(body.mode, Mode::Modify | Mode::Synthesize) && state.dispatcher.ctx.middleware.is_none() {
        return Err(Error::BadRequest {
            message: format!("cannot switch to {} mode: no middleware is configured", body.mode),
        });
    }

    state.dispatcher.set_mode(body.mode);
    Ok(Json(ModeView {
        mode: state.dispatcher.mode(),
    }))
}
