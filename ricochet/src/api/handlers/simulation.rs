//! Simulation handlers: export, atomic load, and wipe.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use crate::errors::{Error, Result};
use crate::simulation::{parse_simulation, simulation_to_legacy_value, simulation_to_view};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Schema version to export at; defaults to the canonical v5.
    #[serde(rename = "schemaVersion")]
    pub schema_version: Option<String>,
}

/// Export the loaded simulation. `?schemaVersion=v1..v4` down-converts,
/// losing anything the older schema cannot express.
#[tracing::instrument(skip_all)]
pub async fn get_simulation(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Result<Json<Value>> {
    let simulation = state.store.export();
    let document = match query.schema_version.as_deref() {
        None | Some("v5") => serde_json::to_value(simulation_to_view(&simulation, Utc::now()))
            .map_err(|e| Error::Other(anyhow::anyhow!("could not serialize simulation: {e}")))?,
        Some(version @ ("v1" | "v2" | "v3" | "v4")) => simulation_to_legacy_value(&simulation, version),
        Some(other) => {
            return Err(Error::BadRequest {
                message: format!("unsupported schema version {other:?}"),
            });
        }
    };
    Ok(Json(document))
}

/// Load a simulation document (any supported schema version). The load is
/// atomic: a document that fails to parse or compile leaves the current
/// simulation untouched.
#[tracing::instrument(skip_all)]
pub async fn put_simulation(State(state): State<AppState>, body: String) -> Result<StatusCode> {
    let simulation = parse_simulation(&body)?;
    state.store.load(simulation)?;
    Ok(StatusCode::OK)
}

#[tracing::instrument(skip_all)]
pub async fn delete_simulation(State(state): State<AppState>) -> StatusCode {
    state.store.delete_all();
    StatusCode::OK
}
