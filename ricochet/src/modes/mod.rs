//! The mode state machine: per-request behavior selection.
//!
//! The dispatcher owns the current [`Mode`] and the shared context every
//! request task borrows: store, cache, journals, hook pool, middleware, and
//! the upstream HTTP client. Mode changes come from the admin surface, never
//! from the traffic itself.
//!
//! Whatever a mode does, the dispatcher guarantees: every exchange lands in
//! the journal, every failure becomes a synthetic response rather than a
//! dropped connection, and state transitions for matched responses are
//! applied exactly once - after the response is finalized, before its hooks
//! are enqueued.

pub mod capture;
pub mod diff;
pub mod modify;
pub mod simulate;
pub mod spy;
pub mod synthesize;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::cache::Cache;
use crate::errors::{Error, Result};
use crate::hooks::HookPool;
use crate::journal::{DiffJournal, Journal, JournalEntry};
use crate::middleware::Middleware;
use crate::models::request::ParsedRequest;
use crate::models::response::ResponseDetails;
use crate::simulation::{RequestView, response_to_view};
use crate::store::SimulationStore;
use crate::templating::{TemplateRuntime, Templater};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Simulate,
    Capture,
    Modify,
    Spy,
    Synthesize,
    Diff,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Simulate => "simulate",
            Mode::Capture => "capture",
            Mode::Modify => "modify",
            Mode::Spy => "spy",
            Mode::Synthesize => "synthesize",
            Mode::Diff => "diff",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulate" => Ok(Mode::Simulate),
            "capture" => Ok(Mode::Capture),
            "modify" => Ok(Mode::Modify),
            "spy" => Ok(Mode::Spy),
            "synthesize" => Ok(Mode::Synthesize),
            "diff" => Ok(Mode::Diff),
            other => Err(format!("unknown mode {other:?}")),
        }
    }
}

/// Everything a request task needs, bundled so nothing is process-global.
#[derive(Clone)]
pub struct DispatchContext {
    pub store: Arc<SimulationStore>,
    pub cache: Arc<Cache>,
    pub journal: Arc<Journal>,
    pub diff_journal: Arc<DiffJournal>,
    pub hooks: Arc<HookPool>,
    pub middleware: Option<Arc<Middleware>>,
    pub runtime: Arc<TemplateRuntime>,
    pub templater: Arc<Templater>,
    pub client: reqwest::Client,
}

impl DispatchContext {
    /// Forward the request to its intended destination.
    pub async fn forward(&self, request: &ParsedRequest) -> Result<ResponseDetails> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Upstream { cause: format!("bad method {:?}: {e}", request.method) })?;

        let query = request.query_string();
        let url = if query.is_empty() {
            format!("{}://{}{}", request.scheme, request.destination, request.path)
        } else {
            format!("{}://{}{}?{}", request.scheme, request.destination, request.path, query)
        };

        let mut outbound = self.client.request(method, &url);
        for (name, values) in request.headers.iter() {
            // Per-hop headers are rewritten by the client.
            if ["host", "content-length", "connection"].contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            for value in values {
                outbound = outbound.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            outbound = outbound.body(request.body.clone());
        }

        let upstream = outbound
            .send()
            .await
            .map_err(|e| Error::Upstream { cause: e.to_string() })?;

        let status = upstream.status().as_u16();
        let mut headers = crate::models::Headers::new();
        for (name, value) in upstream.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }
        let body = upstream
            .bytes()
            .await
            .map_err(|e| Error::Upstream { cause: format!("could not read upstream body: {e}") })?;

        Ok(ResponseDetails {
            status,
            headers,
            body,
            ..Default::default()
        })
    }
}

/// What a mode produced for one request, plus the journal-facing extras.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub response: ResponseDetails,
    pub matched_response: Option<ResponseDetails>,
    pub upstream_response: Option<ResponseDetails>,
    pub matching_result: Option<String>,
}

impl ProcessOutcome {
    pub fn plain(response: ResponseDetails) -> Self {
        ProcessOutcome {
            response,
            matched_response: None,
            upstream_response: None,
            matching_result: None,
        }
    }
}

/// The per-request state machine entry point.
pub struct ModeDispatcher {
    mode: RwLock<Mode>,
    pub ctx: DispatchContext,
}

impl ModeDispatcher {
    pub fn new(mode: Mode, ctx: DispatchContext) -> Self {
        ModeDispatcher {
            mode: RwLock::new(mode),
            ctx,
        }
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read().expect("mode lock poisoned")
    }

    /// Admin-driven transition. Takes effect for the next request.
    pub fn set_mode(&self, mode: Mode) {
        let previous = {
            let mut current = self.mode.write().expect("mode lock poisoned");
            std::mem::replace(&mut *current, mode)
        };
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "mode changed");
        }
    }

    /// Translate one live request into a response. Never fails: errors
    /// become synthetic responses and everything is journaled.
    #[tracing::instrument(skip_all, fields(mode = %self.mode(), destination = %request.destination, path = %request.path))]
    pub async fn dispatch(&self, request: ParsedRequest) -> ResponseDetails {
        let started = Instant::now();
        let mode = self.mode();

        let result = match mode {
            Mode::Simulate => simulate::process(&self.ctx, &request).await,
            Mode::Capture => capture::process(&self.ctx, &request).await,
            Mode::Modify => modify::process(&self.ctx, &request).await,
            Mode::Spy => spy::process(&self.ctx, &request).await,
            Mode::Synthesize => synthesize::process(&self.ctx, &request).await,
            Mode::Diff => diff::process(&self.ctx, &request).await,
        };

        let (response, entry) = match result {
            Ok(outcome) => {
                let entry = JournalEntry {
                    request: RequestView::from_request(&request),
                    matched_response: outcome.matched_response.as_ref().map(response_to_view),
                    upstream_response: outcome.upstream_response.as_ref().map(response_to_view),
                    mode,
                    latency: started.elapsed(),
                    timestamp: request.timestamp,
                    matching_result: outcome.matching_result,
                };
                (outcome.response, entry)
            }
            Err(err) => {
                let response = err.synthetic_response();
                let entry = JournalEntry {
                    request: RequestView::from_request(&request),
                    matched_response: None,
                    upstream_response: None,
                    mode,
                    latency: started.elapsed(),
                    timestamp: request.timestamp,
                    matching_result: Some(err.to_string()),
                };
                tracing::warn!(mode = %mode, "exchange failed: {err}");
                (response, entry)
            }
        };

        self.ctx.journal.record(entry);
        response
    }
}
