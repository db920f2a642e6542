//! Modify mode: forward upstream, let middleware rewrite the returned
//! pair, and emit the rewritten response. Nothing is recorded.

use crate::errors::{Error, Result};
use crate::models::request::ParsedRequest;
use crate::simulation::ExchangeView;

use super::{DispatchContext, ProcessOutcome};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let middleware = ctx.middleware.as_ref().ok_or_else(|| Error::Middleware {
        middleware: "<none>".to_string(),
        cause: "modify mode requires middleware to be configured".to_string(),
    })?;

    let upstream = ctx.forward(request).await?;
    let replaced = middleware.apply(ExchangeView::new(request, &upstream)).await?;
    let response = replaced.into_response()?;

    Ok(ProcessOutcome {
        response,
        matched_response: None,
        upstream_response: Some(upstream),
        matching_result: None,
    })
}
