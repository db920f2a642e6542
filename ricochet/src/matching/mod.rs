//! Request matching: primitives, per-dimension constraints, and the engine
//! that selects a winning pair for a live request.
//!
//! A [`RequestMatcher`] constrains any subset of the request's dimensions
//! (path, method, destination, scheme, body, headers, query) with ordered
//! lists of [`Matcher`] primitives, plus a `requires_state` precondition on
//! the state bag. A dimension with no matchers imposes no restriction.
//!
//! Matchers are compiled once at simulation load (regexes, globs, JSONPaths,
//! XML path expressions); compilation failures are configuration errors and
//! fail the load, never a live request.

pub mod engine;
pub mod matchers;
pub mod xml;

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::errors::Result;
use crate::models::response::ResponseDetails;
use matchers::{CompiledMatcher, Matcher};

/// Constraints over one request, one dimension at a time.
///
/// `headers` and `query` map names (matched case-insensitively) to matcher
/// lists. `requires_state` keys must all hold in the state bag before the
/// pair is even considered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMatcher {
    pub path: Vec<Matcher>,
    pub method: Vec<Matcher>,
    pub destination: Vec<Matcher>,
    pub scheme: Vec<Matcher>,
    pub body: Vec<Matcher>,
    pub headers: IndexMap<String, Vec<Matcher>>,
    pub query: IndexMap<String, Vec<Matcher>>,
    pub requires_state: HashMap<String, String>,
}

impl RequestMatcher {
    /// A matcher that constrains nothing and therefore matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matcher requiring byte-equality on every dimension of a captured
    /// request. Used by capture mode to store replayable pairs.
    pub fn exact_from(request: &crate::models::request::ParsedRequest) -> Self {
        let mut matcher = RequestMatcher {
            path: vec![Matcher::exact(&request.path)],
            method: vec![Matcher::exact(&request.method)],
            destination: vec![Matcher::exact(&request.destination)],
            scheme: vec![Matcher::exact(request.scheme.to_string())],
            body: vec![Matcher::exact(request.body_string())],
            ..Default::default()
        };
        for (name, values) in request.query.iter() {
            matcher
                .query
                .insert(name.clone(), values.iter().map(Matcher::exact).collect());
        }
        matcher
    }
}

/// A request matcher bound to the response it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub matcher: RequestMatcher,
    pub response: ResponseDetails,
}

/// A pair with every primitive compiled, ready for evaluation. Kept in
/// insertion order inside a store snapshot.
#[derive(Debug, Clone)]
pub struct CompiledPair {
    pub source: Pair,
    pub path: Vec<CompiledMatcher>,
    pub method: Vec<CompiledMatcher>,
    pub destination: Vec<CompiledMatcher>,
    pub scheme: Vec<CompiledMatcher>,
    pub body: Vec<CompiledMatcher>,
    pub headers: IndexMap<String, Vec<CompiledMatcher>>,
    pub query: IndexMap<String, Vec<CompiledMatcher>>,
}

impl CompiledPair {
    pub fn compile(pair: Pair) -> Result<Self> {
        fn compile_all(matchers: &[Matcher]) -> Result<Vec<CompiledMatcher>> {
            matchers.iter().map(CompiledMatcher::compile).collect()
        }
        fn compile_map(map: &IndexMap<String, Vec<Matcher>>) -> Result<IndexMap<String, Vec<CompiledMatcher>>> {
            map.iter()
                .map(|(name, ms)| Ok((name.clone(), compile_all(ms)?)))
                .collect()
        }

        Ok(CompiledPair {
            path: compile_all(&pair.matcher.path)?,
            method: compile_all(&pair.matcher.method)?,
            destination: compile_all(&pair.matcher.destination)?,
            scheme: compile_all(&pair.matcher.scheme)?,
            body: compile_all(&pair.matcher.body)?,
            headers: compile_map(&pair.matcher.headers)?,
            query: compile_map(&pair.matcher.query)?,
            source: pair,
        })
    }

    pub fn response(&self) -> &ResponseDetails {
        &self.source.response
    }

    pub fn requires_state(&self) -> &HashMap<String, String> {
        &self.source.matcher.requires_state
    }
}
