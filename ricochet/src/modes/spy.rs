//! Spy mode: simulate when a pair matches, fall through to the real
//! upstream when none does - without recording anything.

use crate::errors::Result;
use crate::matching::engine;
use crate::models::request::ParsedRequest;

use super::{DispatchContext, ProcessOutcome, simulate};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let snapshot = ctx.store.snapshot();
    let state = ctx.store.state.snapshot();

    match engine::find_match(&snapshot.pairs, request, &state) {
        Ok(outcome) => simulate::serve_matched(ctx, request, &snapshot, outcome).await,
        Err(report) => {
            tracing::debug!("no simulated match, forwarding upstream");
            let upstream = ctx.forward(request).await?;
            Ok(ProcessOutcome {
                response: upstream.clone(),
                matched_response: None,
                upstream_response: Some(upstream),
                matching_result: Some(format!("no match, forwarded upstream; {}", report.render())),
            })
        }
    }
}
