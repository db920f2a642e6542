//! The matching engine: ranks candidate pairs against a live request and
//! selects a single winner.
//!
//! Selection is a three-stage pipeline:
//!
//! 1. filter out pairs whose `requires_state` is not satisfied by the
//!    current state bag;
//! 2. keep pairs where every *constrained* dimension matches all of its
//!    matchers (strong matches);
//! 3. pick the strong match with the highest specificity - the count of
//!    constrained dimensions plus the total number of individual matchers -
//!    breaking ties by insertion order.
//!
//! When nothing strong-matches, the engine reports the closest miss: the
//! candidate failing the fewest dimensions, with a per-dimension breakdown
//! for the synthetic 502 body. The engine never mutates the store; state
//! transitions belong to the dispatcher.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::models::request::ParsedRequest;
use super::matchers::CompiledMatcher;
use super::CompiledPair;

/// The request dimensions a matcher can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Path,
    Method,
    Destination,
    Scheme,
    Body,
    Headers,
    Query,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Path => "path",
            Dimension::Method => "method",
            Dimension::Destination => "destination",
            Dimension::Scheme => "scheme",
            Dimension::Body => "body",
            Dimension::Headers => "headers",
            Dimension::Query => "query",
        };
        write!(f, "{name}")
    }
}

/// How specific a request matcher is; the higher total wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Specificity {
    pub constrained_dimensions: usize,
    pub matcher_count: usize,
}

impl Specificity {
    pub fn total(&self) -> usize {
        self.constrained_dimensions + self.matcher_count
    }
}

/// A successful selection.
#[derive(Debug)]
pub struct MatchOutcome<'a> {
    pub pair_index: usize,
    pub pair: &'a CompiledPair,
    pub specificity: Specificity,
}

/// One failed dimension of a candidate, for diagnostics.
#[derive(Debug, Clone)]
pub struct DimensionMiss {
    pub dimension: Dimension,
    pub expected: Vec<String>,
    pub actual: String,
}

/// The closest-missing candidate when nothing strong-matched.
#[derive(Debug, Clone)]
pub struct MissReport {
    pub pair_index: usize,
    pub failed: Vec<DimensionMiss>,
}

/// Diagnostics returned when no pair strong-matches.
#[derive(Debug, Clone, Default)]
pub struct NoMatchReport {
    pub closest: Option<MissReport>,
}

impl NoMatchReport {
    /// Render the per-dimension breakdown used in the 502 body.
    pub fn render(&self) -> String {
        let Some(closest) = &self.closest else {
            return "no candidate pairs were eligible".to_string();
        };
        let mut out = format!("closest candidate: pair {} failed on:\n", closest.pair_index);
        for miss in &closest.failed {
            out.push_str(&format!(
                "  {}:\n    expected: [{}]\n    actual:   {:?}\n",
                miss.dimension,
                miss.expected.join(", "),
                miss.actual,
            ));
        }
        out
    }
}

/// Select the winning pair for a request, or explain why none matched.
pub fn find_match<'a>(
    pairs: &'a [CompiledPair],
    request: &ParsedRequest,
    state: &HashMap<String, String>,
) -> Result<MatchOutcome<'a>, NoMatchReport> {
    let mut best: Option<MatchOutcome<'a>> = None;
    let mut closest: Option<MissReport> = None;

    for (index, pair) in pairs.iter().enumerate() {
        if !state_satisfied(pair.requires_state(), state) {
            continue;
        }

        let misses = evaluate(pair, request);
        if misses.is_empty() {
            let specificity = specificity_of(pair);
            // Strictly-greater keeps the earliest pair on ties.
            let better = match &best {
                Some(current) => specificity.total() > current.specificity.total(),
                None => true,
            };
            if better {
                best = Some(MatchOutcome {
                    pair_index: index,
                    pair,
                    specificity,
                });
            }
        } else {
            let nearer = match &closest {
                Some(current) => misses.len() < current.failed.len(),
                None => true,
            };
            if nearer {
                closest = Some(MissReport {
                    pair_index: index,
                    failed: misses,
                });
            }
        }
    }

    best.ok_or(NoMatchReport { closest })
}

fn state_satisfied(required: &HashMap<String, String>, state: &HashMap<String, String>) -> bool {
    required
        .iter()
        .all(|(key, expected)| state.get(key).is_some_and(|actual| actual == expected))
}

/// Evaluate every constrained dimension, returning the ones that failed.
fn evaluate(pair: &CompiledPair, request: &ParsedRequest) -> Vec<DimensionMiss> {
    let mut misses = Vec::new();

    check_scalar(&mut misses, Dimension::Path, &pair.path, &request.path);
    check_scalar(&mut misses, Dimension::Method, &pair.method, &request.method);
    check_scalar(&mut misses, Dimension::Destination, &pair.destination, &request.destination);
    check_scalar(&mut misses, Dimension::Scheme, &pair.scheme, &request.scheme.to_string());
    check_scalar(&mut misses, Dimension::Body, &pair.body, &request.body_string());

    check_named(
        &mut misses,
        Dimension::Headers,
        &pair.headers,
        |name| request.headers.get(name).map(<[String]>::to_vec),
    );
    check_named(&mut misses, Dimension::Query, &pair.query, |name| {
        request
            .query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, vs)| vs.clone())
    });

    misses
}

fn check_scalar(misses: &mut Vec<DimensionMiss>, dimension: Dimension, matchers: &[CompiledMatcher], actual: &str) {
    if matchers.is_empty() {
        return;
    }
    if !matchers.iter().all(|m| m.matches(actual)) {
        misses.push(DimensionMiss {
            dimension,
            expected: matchers.iter().map(CompiledMatcher::describe).collect(),
            actual: truncate(actual, 200),
        });
    }
}

/// Header/query groups: a missing name fails the group outright (never
/// vacuous truth); a present name passes a matcher if any of its values do.
/// Extra names in the request are ignored.
fn check_named<F>(
    misses: &mut Vec<DimensionMiss>,
    dimension: Dimension,
    groups: &IndexMap<String, Vec<CompiledMatcher>>,
    lookup: F,
) where
    F: Fn(&str) -> Option<Vec<String>>,
{
    if groups.is_empty() {
        return;
    }
    let mut expected = Vec::new();
    let mut failed = false;
    let mut actuals = Vec::new();

    for (name, matchers) in groups {
        match lookup(name) {
            Some(values) => {
                if !matchers.iter().all(|m| values.iter().any(|v| m.matches(v))) {
                    failed = true;
                }
                actuals.push(format!("{name}={values:?}"));
            }
            None => {
                failed = true;
                actuals.push(format!("{name}=<absent>"));
            }
        }
        for m in matchers {
            expected.push(format!("{name}: {}", m.describe()));
        }
    }

    if failed {
        misses.push(DimensionMiss {
            dimension,
            expected,
            actual: actuals.join("; "),
        });
    }
}

fn specificity_of(pair: &CompiledPair) -> Specificity {
    let mut constrained = 0;
    let mut count = 0;

    for dim in [&pair.path, &pair.method, &pair.destination, &pair.scheme, &pair.body] {
        if !dim.is_empty() {
            constrained += 1;
            count += dim.len();
        }
    }
    for groups in [&pair.headers, &pair.query] {
        if !groups.is_empty() {
            constrained += 1;
            count += groups.values().map(Vec::len).sum::<usize>();
        }
    }

    Specificity {
        constrained_dimensions: constrained,
        matcher_count: count,
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::matchers::Matcher;
    use crate::matching::{Pair, RequestMatcher};
    use crate::models::request::{ParsedRequest, Scheme};
    use crate::models::response::ResponseDetails;

    fn compiled(matcher: RequestMatcher, status: u16) -> CompiledPair {
        CompiledPair::compile(Pair {
            matcher,
            response: ResponseDetails::new(status, ""),
        })
        .unwrap()
    }

    fn request(destination: &str, path: &str) -> ParsedRequest {
        ParsedRequest::new("GET", Scheme::Http, destination, path)
    }

    #[test]
    fn unconstrained_dimensions_impose_no_restriction() {
        let pairs = vec![compiled(RequestMatcher::any(), 200)];
        let outcome = find_match(&pairs, &request("anywhere.com", "/whatever"), &HashMap::new()).unwrap();
        assert_eq!(outcome.pair_index, 0);
        assert_eq!(outcome.specificity.total(), 0);
    }

    #[test]
    fn most_specific_strong_match_wins() {
        let loose = RequestMatcher {
            destination: vec![Matcher::glob("*.example.com")],
            ..Default::default()
        };
        let tight = RequestMatcher {
            destination: vec![Matcher::exact("api.example.com")],
            path: vec![Matcher::exact("/v1")],
            ..Default::default()
        };
        let pairs = vec![compiled(loose, 201), compiled(tight, 202)];

        let outcome = find_match(&pairs, &request("api.example.com", "/v1"), &HashMap::new()).unwrap();
        assert_eq!(outcome.pair.response().status, 202);
    }

    #[test]
    fn specificity_ties_break_by_insertion_order() {
        let a = RequestMatcher {
            path: vec![Matcher::exact("/v1")],
            ..Default::default()
        };
        let pairs = vec![compiled(a.clone(), 201), compiled(a, 202)];
        let outcome = find_match(&pairs, &request("x.com", "/v1"), &HashMap::new()).unwrap();
        assert_eq!(outcome.pair.response().status, 201);
    }

    #[test]
    fn required_state_filters_candidates() {
        let mut matcher = RequestMatcher::any();
        matcher.requires_state.insert("authenticated".into(), "true".into());
        let pairs = vec![compiled(matcher, 200)];

        assert!(find_match(&pairs, &request("x.com", "/"), &HashMap::new()).is_err());

        let mut state = HashMap::new();
        state.insert("authenticated".to_string(), "true".to_string());
        assert!(find_match(&pairs, &request("x.com", "/"), &state).is_ok());
    }

    #[test]
    fn absent_header_fails_the_group() {
        let mut matcher = RequestMatcher::any();
        matcher
            .headers
            .insert("Authorization".into(), vec![Matcher::glob("Bearer *")]);
        let pairs = vec![compiled(matcher, 200)];

        let bare = request("x.com", "/");
        let report = find_match(&pairs, &bare, &HashMap::new()).unwrap_err();
        let closest = report.closest.unwrap();
        assert_eq!(closest.failed.len(), 1);
        assert_eq!(closest.failed[0].dimension, Dimension::Headers);

        let mut with_header = request("x.com", "/");
        with_header.headers.append("authorization", "Bearer abc");
        assert!(find_match(&pairs, &with_header, &HashMap::new()).is_ok());
    }

    #[test]
    fn extra_request_headers_and_queries_are_ignored(){
        let mut matcher = RequestMatcher::any();
        matcher.query.insert("page".into(), vec![Matcher::exact("1")]);
        let pairs = vec![compiled(matcher, 200)];

        let mut req = request("x.com", "/list?page=1&noise=9");
        req.headers.append("X-Unrelated", "whatever");
        assert!(find_match(&pairs, &req, &HashMap::new()).is_ok());
    }

    #[test]
    fn closest_miss_has_fewest_failing_dimensions() {
        let far = RequestMatcher {
            destination: vec![Matcher::exact("far.com")],
            path: vec![Matcher::exact("/far")],
            method: vec![Matcher::exact("POST")],
            ..Default::default()
        };
        let near = RequestMatcher {
            destination: vec![Matcher::exact("near.com")],
            path: vec![Matcher::exact("/")],
            ..Default::default()
        };
        let pairs = vec![compiled(far, 201), compiled(near, 202)];

        let report = find_match(&pairs, &request("missing.com", "/"), &HashMap::new()).unwrap_err();
        let closest = report.closest.clone().unwrap();
        assert_eq!(closest.pair_index, 1);
        assert_eq!(closest.failed.len(), 1);
        let rendered = report.render();
        assert!(rendered.contains("destination"));
        assert!(rendered.contains("near.com"));
    }

    #[test]
    fn diagnostics_mention_every_failed_dimension() {
        let matcher = RequestMatcher {
            destination: vec![Matcher::exact("positive-match.com")],
            ..Default::default()
        };
        let pairs = vec![compiled(matcher, 200)];
        let report = find_match(&pairs, &request("missing.com", "/"), &HashMap::new()).unwrap_err();
        let rendered = report.render();
        assert!(rendered.contains("destination"));
        assert!(rendered.contains("positive-match.com"));
        assert!(rendered.contains("missing.com"));
    }
}
