//! Simulate mode: answer from the loaded simulation, never touch upstream.

use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::matching::engine::{self, MatchOutcome};
use crate::models::request::ParsedRequest;
use crate::simulation::ExchangeView;
use crate::store::Snapshot;

use super::{DispatchContext, ProcessOutcome};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let snapshot = ctx.store.snapshot();
    let state = ctx.store.state.snapshot();

    match engine::find_match(&snapshot.pairs, request, &state) {
        Ok(outcome) => serve_matched(ctx, request, &snapshot, outcome).await,
        Err(report) => Err(Error::NoMatch {
            diagnostic: report.render(),
        }),
    }
}

/// Serve a matched pair: render, run middleware, delay, transition state,
/// enqueue hooks. Shared with spy mode.
pub(super) async fn serve_matched(
    ctx: &DispatchContext,
    request: &ParsedRequest,
    snapshot: &Arc<Snapshot>,
    outcome: MatchOutcome<'_>,
) -> Result<ProcessOutcome> {
    let matched = outcome.pair.response().clone();
    let matching_result = format!(
        "matched pair {} (specificity {})",
        outcome.pair_index,
        outcome.specificity.total()
    );
    let mut response = matched.clone();

    if response.templated {
        let state = ctx.store.state.snapshot();
        let rendered = ctx.templater.render(
            &response.body_string(),
            request,
            &state,
            &snapshot.literals,
            &snapshot.variables,
        )?;
        response.body = rendered.into_bytes().into();
    }

    if let Some(middleware) = &ctx.middleware {
        let replaced = middleware.apply(ExchangeView::new(request, &response)).await?;
        response = replaced.into_response()?;
    }

    let mut delay = ctx.runtime.with_rng(|rng| response.sample_delay(rng));
    let url = format!("{}{}", request.destination, request.path);
    if let Some(global) = snapshot
        .global_delays
        .iter()
        .find(|d| d.applies_to(&request.method, &url))
    {
        delay += ctx.runtime.with_rng(|rng| global.sample(rng));
    }
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    // The transition step: serialized on the state bag's lock, exactly once
    // per matched response, before its hooks are enqueued.
    ctx.store
        .state
        .apply(&response.transitions_state, &response.removes_state);

    let payload = ExchangeView::new(request, &response);
    for hook in response.post_action_hooks.iter().chain(snapshot.global_actions.iter()) {
        ctx.hooks.submit(hook.clone(), payload.clone());
    }

    Ok(ProcessOutcome {
        response,
        matched_response: Some(matched),
        upstream_response: None,
        matching_result: Some(matching_result),
    })
}
