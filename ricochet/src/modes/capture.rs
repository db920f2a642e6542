//! Capture mode: forward upstream, record the exchange, return the
//! upstream response unchanged.
//!
//! The recorded pair lands in two places: the live store (so a later switch
//! to simulate mode replays it without a reload) and the durable cache,
//! keyed by the request fingerprint.

use crate::cache::{REQUESTS_BUCKET, fingerprint};
use crate::errors::Result;
use crate::matching::{Pair, RequestMatcher};
use crate::models::request::ParsedRequest;
use crate::simulation::CapturedPairView;

use super::{DispatchContext, ProcessOutcome};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let upstream = ctx.forward(request).await?;

    let pair = Pair {
        matcher: RequestMatcher::exact_from(request),
        response: upstream.clone(),
    };
    ctx.store.add_pair(pair.clone())?;

    let view = CapturedPairView::new(request, &pair);
    let key = fingerprint(&view.request.fingerprint_view());
    let serialized = serde_json::to_vec(&view).map_err(|e| anyhow::anyhow!("could not serialize captured pair: {e}"))?;
    ctx.cache.set(REQUESTS_BUCKET, key.as_bytes(), &serialized).await?;

    tracing::debug!(key = %key, "captured exchange");

    Ok(ProcessOutcome {
        response: upstream.clone(),
        matched_response: None,
        upstream_response: Some(upstream),
        matching_result: None,
    })
}
