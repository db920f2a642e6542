//! Synthesize mode: the middleware *is* the service. No upstream call is
//! ever made; the middleware receives the request paired with an empty
//! response and whatever it returns goes to the client.

use crate::errors::{Error, Result};
use crate::models::request::ParsedRequest;
use crate::models::response::ResponseDetails;
use crate::simulation::ExchangeView;

use super::{DispatchContext, ProcessOutcome};

pub async fn process(ctx: &DispatchContext, request: &ParsedRequest) -> Result<ProcessOutcome> {
    let middleware = ctx.middleware.as_ref().ok_or_else(|| Error::Middleware {
        middleware: "<none>".to_string(),
        cause: "synthesize mode requires middleware to be configured".to_string(),
    })?;

    let empty = ResponseDetails::default();
    let synthesized = middleware.apply(ExchangeView::new(request, &empty)).await?;
    let response = synthesized.into_response()?;

    Ok(ProcessOutcome::plain(response))
}
