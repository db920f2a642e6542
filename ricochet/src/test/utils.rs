//! Shared builders for scenario tests.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::cache::Cache;
use crate::config::Config;
use crate::hooks::HookPool;
use crate::journal::{DiffJournal, Journal};
use crate::matching::matchers::Matcher;
use crate::matching::{Pair, RequestMatcher};
use crate::middleware::Middleware;
use crate::models::request::{ParsedRequest, Scheme};
use crate::models::response::ResponseDetails;
use crate::modes::{DispatchContext, Mode, ModeDispatcher};
use crate::store::{Simulation, SimulationStore};
use crate::templating::{TemplateRuntime, Templater};
use crate::AppState;

pub(crate) struct TestHarness {
    pub dispatcher: Arc<ModeDispatcher>,
    pub store: Arc<SimulationStore>,
    pub cache: Arc<Cache>,
    pub journal: Arc<Journal>,
    pub diff_journal: Arc<DiffJournal>,
    _tmp: TempDir,
}

impl TestHarness {
    pub(crate) fn new(mode: Mode) -> Self {
        Self::build(mode, None)
    }

    pub(crate) fn with_middleware(mode: Mode, middleware: Middleware) -> Self {
        Self::build(mode, Some(Arc::new(middleware)))
    }

    fn build(mode: Mode, middleware: Option<Arc<Middleware>>) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(Cache::open(tmp.path().join("cache.db")).expect("cache"));
        let store = Arc::new(SimulationStore::new());
        let journal = Arc::new(Journal::new(100));
        let diff_journal = Arc::new(DiffJournal::new(100));
        let runtime = Arc::new(TemplateRuntime::fixed(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            7,
        ));

        let ctx = DispatchContext {
            store: store.clone(),
            cache: cache.clone(),
            journal: journal.clone(),
            diff_journal: diff_journal.clone(),
            hooks: HookPool::start(16, 1),
            middleware,
            templater: Arc::new(Templater::new(runtime.clone())),
            runtime,
            client: reqwest::Client::new(),
        };

        TestHarness {
            dispatcher: Arc::new(ModeDispatcher::new(mode, ctx)),
            store,
            cache,
            journal,
            diff_journal,
            _tmp: tmp,
        }
    }

    pub(crate) fn app_state(&self) -> AppState {
        AppState::builder()
            .dispatcher(self.dispatcher.clone())
            .store(self.store.clone())
            .cache(self.cache.clone())
            .journal(self.journal.clone())
            .diff_journal(self.diff_journal.clone())
            .config(Config::default())
            .build()
    }
}

pub(crate) fn request_to(destination: &str, path: &str) -> ParsedRequest {
    ParsedRequest::new("GET", Scheme::Http, destination, path)
}

/// Strip the scheme from a wiremock server uri, leaving host:port.
pub(crate) fn destination_of(server_uri: &str) -> String {
    server_uri
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .to_string()
}

pub(crate) fn pair_matching_destination(destination: &str, status: u16, body: &str) -> Pair {
    Pair {
        matcher: RequestMatcher {
            destination: vec![Matcher::exact(destination)],
            ..Default::default()
        },
        response: ResponseDetails::new(status, body.to_string()),
    }
}

pub(crate) fn simulation_of(pairs: Vec<Pair>) -> Simulation {
    Simulation {
        pairs,
        ..Default::default()
    }
}
