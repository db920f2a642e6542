//! Cache handlers: the captured-pairs read path and wipe.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;

use crate::AppState;
use crate::cache::REQUESTS_BUCKET;
use crate::errors::{Error, Result};
use crate::simulation::CapturedPairView;

#[derive(Debug, Serialize)]
pub struct CacheView {
    pub cache: Vec<CapturedPairView>,
}

/// All captured pairs, in capture order. A cache that has never captured
/// anything reads as empty here - the raw bucket error stays internal.
#[tracing::instrument(skip_all)]
pub async fn get_cache(State(state): State<AppState>) -> Result<Json<CacheView>> {
    let raw = match state.cache.get_all(REQUESTS_BUCKET) {
        Ok(values) => values,
        Err(Error::BucketNotFound { .. }) => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut cache = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_slice::<CapturedPairView>(&value) {
            Ok(pair) => cache.push(pair),
            Err(e) => tracing::warn!("skipping unreadable cache entry: {e}"),
        }
    }
    Ok(Json(CacheView { cache }))
}

/// Wipe the captured pairs. Wiping an already-empty cache reports the
/// missing bucket.
#[tracing::instrument(skip_all)]
pub async fn delete_cache(State(state): State<AppState>) -> Result<StatusCode> {
    state.cache.delete_bucket(REQUESTS_BUCKET).await?;
    Ok(StatusCode::OK)
}
