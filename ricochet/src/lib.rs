//! # ricochet: HTTP Traffic Interception & Simulation
//!
//! `ricochet` is an HTTP/HTTPS intercepting proxy that records, replays,
//! synthesizes, and modifies traffic between a client and an upstream
//! service. Point a client at it and, depending on the active mode, it will
//! answer from a loaded simulation, capture real traffic for later replay,
//! rewrite exchanges through external middleware, or report how reality
//! diverges from the simulation.
//!
//! ## Overview
//!
//! Teams building against unreliable, rate-limited, or not-yet-existing
//! services need deterministic stand-ins for those services. `ricochet`
//! provides one: simulations are ordered lists of request-matcher →
//! response pairs, loaded over an admin API, matched against live traffic
//! with a specificity-ranked engine, and rendered through a templating
//! layer that can echo request fields, track stateful workflows, and
//! generate realistic fake data.
//!
//! ### Request Flow
//!
//! Every request arriving on the proxy port is parsed once into a canonical
//! form ([`models::request::ParsedRequest`]) and handed to the
//! [mode dispatcher](modes::ModeDispatcher), which consults the active
//! [`Mode`](modes::Mode):
//!
//! - **Simulate** - the [matching engine](matching::engine) picks the most
//!   specific matching pair from the current [store](store::SimulationStore)
//!   snapshot; the response is templated, delayed, and emitted. No match
//!   produces a 502 carrying a closest-miss diagnostic.
//! - **Capture** - the request is forwarded upstream; the exchange is
//!   recorded into the store and the durable [cache](cache::Cache), and the
//!   upstream response passes through unchanged.
//! - **Spy** - simulate when a pair matches, forward (without recording)
//!   when none does.
//! - **Modify** - the upstream exchange is rewritten by external
//!   [middleware](middleware::Middleware).
//! - **Synthesize** - middleware fabricates the response; upstream is never
//!   contacted.
//! - **Diff** - upstream answers, and per-field differences against the
//!   matched simulated response are journaled.
//!
//! After the response is finalized, matched responses apply their state
//! transitions exactly once and enqueue [post-action hooks](hooks) that run
//! in the background. Every exchange lands in the bounded
//! [journal](journal::Journal).
//!
//! ### Core Components
//!
//! The **matching layer** ([`matching`]) is a closed set of matcher
//! primitives (exact, glob, regex, contains, form, JSON subset, JSONPath,
//! XML, XML path, JWT) combined per request dimension and ranked by
//! specificity. The **store** ([`store`]) holds compiled pairs behind an
//! atomically-swapped snapshot, so loads are atomic and matching never
//! blocks on a writer. The **templating layer** ([`templating`]) renders
//! response bodies with request fields, state, literals, variables, and
//! helper functions. The **cache** ([`cache`]) persists captured pairs in
//! an embedded key-value file with named buckets. The **admin API**
//! ([`api`]) drives mode changes, simulation import/export, state edits,
//! and journal reads on a separate port.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use ricochet::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ricochet::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     ricochet::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod cache;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod journal;
pub mod matching;
pub mod middleware;
pub mod models;
pub mod modes;
pub mod proxy;
pub mod simulation;
pub mod store;
pub mod telemetry;
pub mod templating;

#[cfg(test)]
mod test;

use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::cache::Cache;
pub use crate::config::Config;
use crate::errors::Result;
use crate::hooks::HookPool;
use crate::journal::{DiffJournal, Journal};
use crate::modes::{DispatchContext, ModeDispatcher};
pub use crate::modes::Mode;
use crate::proxy::ProxyState;
use crate::store::SimulationStore;
use crate::templating::{TemplateRuntime, Templater};

/// Application state shared across all admin handlers.
///
/// The dispatcher owns its own [`DispatchContext`]; the fields here are the
/// same shared instances, exposed for the admin surface.
#[derive(Clone, Builder)]
pub struct AppState {
    pub dispatcher: Arc<ModeDispatcher>,
    pub store: Arc<SimulationStore>,
    pub cache: Arc<Cache>,
    pub journal: Arc<Journal>,
    pub diff_journal: Arc<DiffJournal>,
    pub config: Config,
}

/// The assembled proxy: both listeners plus every shared component.
pub struct Application {
    state: AppState,
}

impl Application {
    /// Wire up every component from configuration. Opens the cache file and
    /// starts the hook workers; does not bind any sockets yet.
    pub fn new(config: Config) -> Result<Self> {
        let cache = Arc::new(Cache::open(&config.cache.path)?);
        let store = Arc::new(SimulationStore::new());
        seed_store_from_cache(&cache, &store)?;
        let journal = Arc::new(Journal::new(config.journal.capacity));
        let diff_journal = Arc::new(DiffJournal::new(config.journal.capacity));
        let hooks = HookPool::start(config.hooks.queue_capacity, config.hooks.workers);
        let runtime = Arc::new(TemplateRuntime::default());

        let ctx = DispatchContext {
            store: store.clone(),
            cache: cache.clone(),
            journal: journal.clone(),
            diff_journal: diff_journal.clone(),
            hooks,
            middleware: config.build_middleware()?,
            templater: Arc::new(Templater::new(runtime.clone())),
            runtime,
            client: config.upstream_client()?,
        };
        let dispatcher = Arc::new(ModeDispatcher::new(config.mode, ctx));

        let state = AppState::builder()
            .dispatcher(dispatcher)
            .store(store)
            .cache(cache)
            .journal(journal)
            .diff_journal(diff_journal)
            .config(config)
            .build();

        Ok(Application { state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind both listeners and serve until the shutdown future resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let config = &self.state.config;

        let proxy_listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let admin_listener = TcpListener::bind((config.host.as_str(), config.admin_port)).await?;
        info!(
            proxy = %proxy_listener.local_addr()?,
            admin = %admin_listener.local_addr()?,
            mode = %self.state.dispatcher.mode(),
            "ricochet listening"
        );

        let trace = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));
        let proxy_router = proxy::router(ProxyState {
            dispatcher: self.state.dispatcher.clone(),
            deadline: config.request_deadline,
        })
        .layer(trace.clone());
        let admin_router = api::router(self.state.clone()).layer(trace);

        let stop = CancellationToken::new();
        let watcher = stop.clone();
        tokio::spawn(async move {
            shutdown.await;
            watcher.cancel();
        });

        let proxy_stop = stop.clone();
        let admin_stop = stop.clone();
        tokio::try_join!(
            axum::serve(proxy_listener, proxy_router).with_graceful_shutdown(async move { proxy_stop.cancelled().await }),
            axum::serve(admin_listener, admin_router).with_graceful_shutdown(async move { admin_stop.cancelled().await }),
        )?;

        self.state.dispatcher.ctx.hooks.shutdown();
        info!("ricochet stopped");
        Ok(())
    }
}

/// Reload previously-captured pairs so a restarted process can replay them
/// without re-capturing. A cache that has never captured reads as empty.
fn seed_store_from_cache(cache: &Cache, store: &SimulationStore) -> Result<()> {
    let raw = match cache.get_all(cache::REQUESTS_BUCKET) {
        Ok(values) => values,
        Err(errors::Error::BucketNotFound { .. }) => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut pairs = Vec::with_capacity(raw.len());
    for value in &raw {
        match serde_json::from_slice::<simulation::CapturedPairView>(value) {
            Ok(view) => match view.into_pair() {
                Ok(pair) => pairs.push(pair),
                Err(e) => tracing::warn!("skipping captured pair that no longer compiles: {e}"),
            },
            Err(e) => tracing::warn!("skipping unreadable cache entry: {e}"),
        }
    }

    if !pairs.is_empty() {
        info!(pairs = pairs.len(), "seeded simulation from captured cache");
        store.load(store::Simulation {
            pairs,
            ..Default::default()
        })?;
    }
    Ok(())
}
