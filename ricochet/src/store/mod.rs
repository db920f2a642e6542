//! The simulation store: the mutable set of pairs, global template inputs,
//! and the live state bag.
//!
//! Readers (the matching engine, templating) never lock: they grab an
//! immutable [`Snapshot`] behind an [`ArcSwap`] pointer. Writers (simulation
//! load, admin mutations) build a complete new snapshot and swap it in, so
//! `load` is atomic - a simulation that fails to compile leaves the previous
//! one untouched.

pub mod state;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use regex::Regex;

use crate::errors::Result;
use crate::matching::matchers::compile_regex;
use crate::matching::{CompiledPair, Pair};
use crate::models::response::{LogNormalDelay, PostActionHook};
use crate::templating;
use state::StateBag;

/// A named constant available to every template.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLiteral {
    pub name: String,
    pub value: Value,
}

/// A named helper invocation evaluated per request and exposed to every
/// template under its name.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    pub function: String,
    pub arguments: Vec<Value>,
}

/// A latency injected into every matched response whose URL and method fit
/// the filters. At most one of the fixed and log-normal forms is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalDelay {
    /// Regex over `destination` + `path`; `None` applies everywhere.
    pub url_pattern: Option<String>,
    /// Method the delay is limited to; `None` applies to all methods.
    pub http_method: Option<String>,
    pub delay_ms: u64,
    pub log_normal: Option<LogNormalDelay>,
}

/// A global delay with its URL pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledGlobalDelay {
    pub source: GlobalDelay,
    pattern: Option<Regex>,
}

impl CompiledGlobalDelay {
    fn compile(source: GlobalDelay) -> Result<Self> {
        let pattern = match &source.url_pattern {
            Some(raw) => Some(compile_regex(raw)?),
            None => None,
        };
        Ok(CompiledGlobalDelay { source, pattern })
    }

    pub fn applies_to(&self, method: &str, url: &str) -> bool {
        if let Some(expected) = &self.source.http_method {
            if !expected.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(url),
            None => true,
        }
    }

    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> std::time::Duration {
        match &self.source.log_normal {
            Some(log_normal) => log_normal.sample(rng),
            None => std::time::Duration::from_millis(self.source.delay_ms),
        }
    }
}

/// The logical content of a simulation, decoupled from any wire schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Simulation {
    pub pairs: Vec<Pair>,
    /// Hooks applied to every matched pair, in addition to the response's own.
    pub global_actions: Vec<PostActionHook>,
    pub global_delays: Vec<GlobalDelay>,
    pub literals: Vec<GlobalLiteral>,
    pub variables: Vec<GlobalVariable>,
}

/// An immutable, fully-compiled view of the store, shared per request.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub pairs: Vec<CompiledPair>,
    pub global_actions: Vec<PostActionHook>,
    pub global_delays: Vec<CompiledGlobalDelay>,
    pub literals: IndexMap<String, Value>,
    pub variables: Vec<GlobalVariable>,
}

impl Snapshot {
    fn build(simulation: &Simulation) -> Result<Self> {
        let mut pairs = Vec::with_capacity(simulation.pairs.len());
        for pair in &simulation.pairs {
            if pair.response.templated {
                templating::validate(&pair.response.body_string())?;
            }
            pairs.push(CompiledPair::compile(pair.clone())?);
        }
        for variable in &simulation.variables {
            templating::validate_variable(&variable.function)?;
        }
        let global_delays = simulation
            .global_delays
            .iter()
            .cloned()
            .map(CompiledGlobalDelay::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Snapshot {
            pairs,
            global_actions: simulation.global_actions.clone(),
            global_delays,
            literals: simulation
                .literals
                .iter()
                .map(|l| (l.name.clone(), l.value.clone()))
                .collect(),
            variables: simulation.variables.clone(),
        })
    }

    /// Reconstruct the logical simulation for export.
    pub fn to_simulation(&self) -> Simulation {
        Simulation {
            pairs: self.pairs.iter().map(|p| p.source.clone()).collect(),
            global_actions: self.global_actions.clone(),
            global_delays: self.global_delays.iter().map(|d| d.source.clone()).collect(),
            literals: self
                .literals
                .iter()
                .map(|(name, value)| GlobalLiteral {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            variables: self.variables.clone(),
        }
    }
}

/// Owner of all per-simulation mutable state.
#[derive(Debug)]
pub struct SimulationStore {
    snapshot: ArcSwap<Snapshot>,
    pub state: StateBag,
}

impl Default for SimulationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationStore {
    pub fn new() -> Self {
        SimulationStore {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            state: StateBag::new(),
        }
    }

    /// Replace the loaded simulation atomically. Compilation or template
    /// errors leave the previous simulation in place.
    pub fn load(&self, simulation: Simulation) -> Result<()> {
        let snapshot = Snapshot::build(&simulation)?;
        self.snapshot.store(Arc::new(snapshot));
        tracing::info!(pairs = simulation.pairs.len(), "simulation loaded");
        Ok(())
    }

    /// The current immutable snapshot. Cheap; taken once per request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Append one pair, keeping everything else. Used by capture mode.
    pub fn add_pair(&self, pair: Pair) -> Result<()> {
        let compiled = CompiledPair::compile(pair)?;
        let current = self.snapshot.load_full();
        let mut pairs = current.pairs.clone();
        pairs.push(compiled);
        self.snapshot.store(Arc::new(Snapshot {
            pairs,
            global_actions: current.global_actions.clone(),
            global_delays: current.global_delays.clone(),
            literals: current.literals.clone(),
            variables: current.variables.clone(),
        }));
        Ok(())
    }

    pub fn pairs_len(&self) -> usize {
        self.snapshot.load().pairs.len()
    }

    /// Drop every pair and global, leaving the state bag untouched.
    pub fn delete_all(&self) {
        self.snapshot.store(Arc::new(Snapshot::default()));
        tracing::info!("simulation wiped");
    }

    pub fn export(&self) -> Simulation {
        self.snapshot.load().to_simulation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::RequestMatcher;
    use crate::matching::matchers::{Matcher, MatcherValue};
    use crate::models::response::ResponseDetails;

    fn pair_for(destination: &str) -> Pair {
        Pair {
            matcher: RequestMatcher {
                destination: vec![Matcher::exact(destination)],
                ..Default::default()
            },
            response: ResponseDetails::new(200, "ok"),
        }
    }

    #[test]
    fn load_replaces_previous_simulation() {
        let store = SimulationStore::new();
        store
            .load(Simulation {
                pairs: vec![pair_for("a.com")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.pairs_len(), 1);

        store
            .load(Simulation {
                pairs: vec![pair_for("b.com"), pair_for("c.com")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.pairs_len(), 2);
    }

    #[test]
    fn failed_load_changes_nothing() {
        let store = SimulationStore::new();
        store
            .load(Simulation {
                pairs: vec![pair_for("keep.com")],
                ..Default::default()
            })
            .unwrap();

        let broken = Simulation {
            pairs: vec![Pair {
                matcher: RequestMatcher {
                    path: vec![Matcher::new(MatcherValue::Regex("(unclosed".into()))],
                    ..Default::default()
                },
                response: ResponseDetails::new(200, ""),
            }],
            ..Default::default()
        };
        assert!(store.load(broken).is_err());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.pairs.len(), 1);
        assert_eq!(
            snapshot.pairs[0].source.matcher.destination,
            vec![Matcher::exact("keep.com")]
        );
    }

    #[test]
    fn bad_template_fails_the_load() {
        let store = SimulationStore::new();
        let mut response = ResponseDetails::new(200, "{{ Request.Path");
        response.templated = true;
        let broken = Simulation {
            pairs: vec![Pair {
                matcher: RequestMatcher::any(),
                response,
            }],
            ..Default::default()
        };
        assert!(store.load(broken).is_err());
        assert_eq!(store.pairs_len(), 0);
    }

    #[test]
    fn bad_global_delay_pattern_fails_the_load() {
        let store = SimulationStore::new();
        let broken = Simulation {
            global_delays: vec![GlobalDelay {
                url_pattern: Some("(unclosed".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(store.load(broken).is_err());
    }

    #[test]
    fn global_delays_filter_by_method_and_url() {
        let delay = CompiledGlobalDelay::compile(GlobalDelay {
            url_pattern: Some(r"slow\.com/.*".into()),
            http_method: Some("GET".into()),
            delay_ms: 10,
            log_normal: None,
        })
        .unwrap();

        assert!(delay.applies_to("GET", "slow.com/api"));
        assert!(delay.applies_to("get", "slow.com/api"));
        assert!(!delay.applies_to("POST", "slow.com/api"));
        assert!(!delay.applies_to("GET", "fast.example/api"));

        let everywhere = CompiledGlobalDelay::compile(GlobalDelay {
            delay_ms: 5,
            ..Default::default()
        })
        .unwrap();
        assert!(everywhere.applies_to("DELETE", "anything.at/all"));
    }

    #[test]
    fn export_round_trips_pair_order() {
        let store = SimulationStore::new();
        let simulation = Simulation {
            pairs: vec![pair_for("first.com"), pair_for("second.com"), pair_for("third.com")],
            ..Default::default()
        };
        store.load(simulation.clone()).unwrap();
        assert_eq!(store.export(), simulation);
    }
}
