//! Matcher primitives: pure predicates over a string subject.
//!
//! Every primitive is side-effect free. Evaluation errors (unparseable JSON
//! subject, malformed XML, bad JWT) are non-matches, never fatal: a broken
//! body must not take the proxy down. Compilation errors, by contrast, are
//! configuration errors surfaced at simulation load.
//!
//! Extracting matchers (`jsonPath`, `xmlPath`/`xpath`) can chain: the scalar
//! they extract becomes the subject of the chained matcher.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use globset::{GlobBuilder, GlobMatcher};
use indexmap::IndexMap;
use moka::sync::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::errors::{Error, Result};
use crate::models::request::parse_query;
use super::xml::{XmlPathExpr, canonicalize};

/// Compiled regexes are cached process-wide, keyed by source text, so
/// re-loading a simulation does not recompile unchanged patterns.
static REGEX_CACHE: Lazy<Cache<String, Regex>> = Lazy::new(|| Cache::builder().max_capacity(1_024).build());

static JSON_PATH_CACHE: Lazy<Cache<String, JsonPath>> = Lazy::new(|| Cache::builder().max_capacity(1_024).build());

/// One matcher primitive, as loaded from a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    pub value: MatcherValue,
    /// Chained matcher fed with the scalar this matcher extracts.
    pub chained: Option<Box<Matcher>>,
}

/// The closed set of matcher kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum MatcherValue {
    Exact(String),
    Glob(String),
    Regex(String),
    Contains(String),
    /// Body parsed as `application/x-www-form-urlencoded`; every named
    /// field must satisfy all of its matchers.
    Form(IndexMap<String, Vec<Matcher>>),
    /// Expected JSON that must be a structural subset of the subject.
    JsonPartial(Value),
    JsonPath(String),
    /// Canonicalized XML equality.
    Xml(String),
    /// Element-path query over an XML subject. `xpath` is accepted as an
    /// alias at the wire level.
    XmlPath(String),
    /// Header/claims asserted as a JSON subset over the decoded token.
    /// Signatures are not verified.
    Jwt(Value),
}

impl Matcher {
    pub fn new(value: MatcherValue) -> Self {
        Matcher { value, chained: None }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Matcher::new(MatcherValue::Exact(value.into()))
    }

    pub fn glob(value: impl Into<String>) -> Self {
        Matcher::new(MatcherValue::Glob(value.into()))
    }

    pub fn with_chained(mut self, chained: Matcher) -> Self {
        self.chained = Some(Box::new(chained));
        self
    }

    /// Wire name of this matcher's kind.
    pub fn kind(&self) -> &'static str {
        match &self.value {
            MatcherValue::Exact(_) => "exact",
            MatcherValue::Glob(_) => "glob",
            MatcherValue::Regex(_) => "regex",
            MatcherValue::Contains(_) => "contains",
            MatcherValue::Form(_) => "form",
            MatcherValue::JsonPartial(_) => "jsonpartial",
            MatcherValue::JsonPath(_) => "jsonpath",
            MatcherValue::Xml(_) => "xml",
            MatcherValue::XmlPath(_) => "xmlpath",
            MatcherValue::Jwt(_) => "jwt",
        }
    }
}

/// A matcher with its expensive parts precompiled.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    source: Matcher,
    engine: CompiledValue,
    chained: Option<Box<CompiledMatcher>>,
}

#[derive(Debug, Clone)]
enum CompiledValue {
    Exact(String),
    Glob(GlobMatcher),
    Regex(Regex),
    Contains(String),
    Form(IndexMap<String, Vec<CompiledMatcher>>),
    JsonPartial(Value),
    JsonPath(JsonPath),
    Xml(String),
    XmlPath(XmlPathExpr),
    Jwt(Value),
}

impl CompiledMatcher {
    pub fn compile(matcher: &Matcher) -> Result<Self> {
        let engine = match &matcher.value {
            MatcherValue::Exact(v) => CompiledValue::Exact(v.clone()),
            MatcherValue::Glob(pattern) => {
                let glob = GlobBuilder::new(pattern)
                    .literal_separator(false)
                    .build()
                    .map_err(|e| Error::config(format!("invalid glob {pattern:?}: {e}")))?;
                CompiledValue::Glob(glob.compile_matcher())
            }
            MatcherValue::Regex(pattern) => CompiledValue::Regex(compile_regex(pattern)?),
            MatcherValue::Contains(v) => CompiledValue::Contains(v.clone()),
            MatcherValue::Form(fields) => {
                let compiled = fields
                    .iter()
                    .map(|(name, ms)| {
                        let ms: Result<Vec<_>> = ms.iter().map(CompiledMatcher::compile).collect();
                        Ok((name.clone(), ms?))
                    })
                    .collect::<Result<IndexMap<_, _>>>()?;
                CompiledValue::Form(compiled)
            }
            MatcherValue::JsonPartial(expected) => CompiledValue::JsonPartial(expected.clone()),
            MatcherValue::JsonPath(path) => CompiledValue::JsonPath(compile_json_path(path)?),
            MatcherValue::Xml(expected) => {
                let canonical = canonicalize(expected)
                    .map_err(|e| Error::config(format!("invalid xml matcher value: {e}")))?;
                CompiledValue::Xml(canonical)
            }
            MatcherValue::XmlPath(path) => {
                let expr = XmlPathExpr::parse(path).map_err(|e| Error::config(format!("invalid xml path {path:?}: {e}")))?;
                CompiledValue::XmlPath(expr)
            }
            MatcherValue::Jwt(expected) => CompiledValue::Jwt(expected.clone()),
        };

        let chained = match &matcher.chained {
            Some(inner) => Some(Box::new(CompiledMatcher::compile(inner)?)),
            None => None,
        };

        Ok(CompiledMatcher {
            source: matcher.clone(),
            engine,
            chained,
        })
    }

    /// Evaluate against a subject. Errors reading the subject are treated
    /// as non-matches.
    pub fn matches(&self, subject: &str) -> bool {
        match &self.engine {
            CompiledValue::Exact(expected) => subject == expected,
            CompiledValue::Glob(glob) => glob.is_match(subject),
            CompiledValue::Regex(regex) => regex.is_match(subject),
            CompiledValue::Contains(needle) => subject.contains(needle),
            CompiledValue::Form(fields) => {
                let parsed = parse_query(subject);
                fields.iter().all(|(name, matchers)| match parsed.get(name) {
                    Some(values) => matchers
                        .iter()
                        .all(|m| values.iter().any(|v| m.matches(v))),
                    None => false,
                })
            }
            CompiledValue::JsonPartial(expected) => match serde_json::from_str::<Value>(subject) {
                Ok(actual) => json_partial_match(expected, &actual),
                Err(_) => false,
            },
            CompiledValue::JsonPath(path) => match serde_json::from_str::<Value>(subject) {
                Ok(document) => {
                    let nodes = path.query(&document);
                    match nodes.all().first().copied() {
                        Some(node) => self.chain(&scalar_to_string(node)),
                        None => false,
                    }
                }
                Err(_) => false,
            },
            CompiledValue::Xml(expected) => match canonicalize(subject) {
                Ok(actual) => actual == *expected,
                Err(_) => false,
            },
            CompiledValue::XmlPath(expr) => match expr.evaluate(subject) {
                Ok(extracted) => match extracted.first() {
                    Some(first) => self.chain(first),
                    None => false,
                },
                Err(_) => false,
            },
            CompiledValue::Jwt(expected) => match decode_jwt(subject) {
                Some(decoded) => json_partial_match(expected, &decoded),
                None => false,
            },
        }
    }

    /// Feed an extracted scalar to the chained matcher, or succeed on
    /// extraction alone when no chain is configured.
    fn chain(&self, extracted: &str) -> bool {
        match &self.chained {
            Some(chained) => chained.matches(extracted),
            None => true,
        }
    }

    /// Human-readable form for closest-miss diagnostics.
    pub fn describe(&self) -> String {
        let value = match &self.source.value {
            MatcherValue::Exact(v)
            | MatcherValue::Glob(v)
            | MatcherValue::Regex(v)
            | MatcherValue::Contains(v)
            | MatcherValue::JsonPath(v)
            | MatcherValue::Xml(v)
            | MatcherValue::XmlPath(v) => v.clone(),
            MatcherValue::Form(fields) => format!("{} field(s)", fields.len()),
            MatcherValue::JsonPartial(v) | MatcherValue::Jwt(v) => v.to_string(),
        };
        format!("{} {value:?}", self.source.kind())
    }

    pub fn source(&self) -> &Matcher {
        &self.source
    }
}

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
    if let Some(cached) = REGEX_CACHE.get(pattern) {
        return Ok(cached);
    }
    let compiled = Regex::new(pattern).map_err(|e| Error::config(format!("invalid regex {pattern:?}: {e}")))?;
    REGEX_CACHE.insert(pattern.to_string(), compiled.clone());
    Ok(compiled)
}

fn compile_json_path(path: &str) -> Result<JsonPath> {
    if let Some(cached) = JSON_PATH_CACHE.get(path) {
        return Ok(cached);
    }
    let compiled = JsonPath::parse(path).map_err(|e| Error::config(format!("invalid json path {path:?}: {e}")))?;
    JSON_PATH_CACHE.insert(path.to_string(), compiled.clone());
    Ok(compiled)
}

/// True when `expected` is a structural subset of `actual`: every object
/// key present with a matching value, arrays matched by containment
/// (order-independent), scalars by equality.
pub fn json_partial_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(key, exp_value)| act.get(key).is_some_and(|act_value| json_partial_match(exp_value, act_value))),
        (Value::Array(exp), Value::Array(act)) => exp
            .iter()
            .all(|exp_item| act.iter().any(|act_item| json_partial_match(exp_item, act_item))),
        (exp, act) => exp == act,
    }
}

/// Decode a compact JWT without verifying its signature, yielding
/// `{"header": .., "payload": ..}` for subset matching.
fn decode_jwt(token: &str) -> Option<Value> {
    let mut parts = token.trim().split('.');
    let header = parts.next()?;
    let payload = parts.next()?;

    let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).ok()?).ok()?;
    let payload: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;

    Some(serde_json::json!({ "header": header, "payload": payload }))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: MatcherValue) -> CompiledMatcher {
        CompiledMatcher::compile(&Matcher::new(value)).unwrap()
    }

    #[test]
    fn exact_is_byte_equality() {
        let m = compile(MatcherValue::Exact("/api/v1".into()));
        assert!(m.matches("/api/v1"));
        assert!(!m.matches("/api/v1/"));
    }

    #[test]
    fn glob_star_crosses_everything_and_question_is_single() {
        let m = compile(MatcherValue::Glob("*.example.com".into()));
        assert!(m.matches("api.example.com"));
        assert!(m.matches("a.b.example.com"));
        assert!(!m.matches("example.com"));

        let q = compile(MatcherValue::Glob("v?".into()));
        assert!(q.matches("v1"));
        assert!(!q.matches("v10"));
    }

    #[test]
    fn glob_is_anchored() {
        let m = compile(MatcherValue::Glob("api".into()));
        assert!(!m.matches("api.example.com"));
        assert!(m.matches("api"));
    }

    #[test]
    fn regex_is_not_anchored() {
        let m = compile(MatcherValue::Regex("v[0-9]+".into()));
        assert!(m.matches("/api/v12/users"));
        assert!(!m.matches("/api/users"));
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        let err = CompiledMatcher::compile(&Matcher::new(MatcherValue::Regex("(unclosed".into()))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn contains_is_substring() {
        let m = compile(MatcherValue::Contains("needle".into()));
        assert!(m.matches("hay needle stack"));
        assert!(!m.matches("haystack"));
    }

    #[test]
    fn json_partial_matches_subsets() {
        let m = compile(MatcherValue::JsonPartial(json!({"user": {"name": "ada"}})));
        assert!(m.matches(r#"{"user": {"name": "ada", "age": 36}, "extra": true}"#));
        assert!(!m.matches(r#"{"user": {"name": "grace"}}"#));
        assert!(!m.matches("not json"));
    }

    #[test]
    fn json_partial_arrays_are_containment_order_independent() {
        let m = compile(MatcherValue::JsonPartial(json!({"tags": ["b", "a"]})));
        assert!(m.matches(r#"{"tags": ["a", "c", "b"]}"#));
        assert!(!m.matches(r#"{"tags": ["a"]}"#));
    }

    #[test]
    fn json_path_requires_non_empty_result() {
        let m = compile(MatcherValue::JsonPath("$.items[*].id".into()));
        assert!(m.matches(r#"{"items": [{"id": 1}]}"#));
        assert!(!m.matches(r#"{"items": []}"#));
    }

    #[test]
    fn json_path_chains_extracted_scalar() {
        let matcher = Matcher::new(MatcherValue::JsonPath("$.user.name".into()))
            .with_chained(Matcher::new(MatcherValue::Glob("a*".into())));
        let m = CompiledMatcher::compile(&matcher).unwrap();
        assert!(m.matches(r#"{"user": {"name": "ada"}}"#));
        assert!(!m.matches(r#"{"user": {"name": "grace"}}"#));
    }

    #[test]
    fn form_matches_urlencoded_fields() {
        let mut fields = IndexMap::new();
        fields.insert("grant_type".to_string(), vec![Matcher::exact("client_credentials")]);
        fields.insert("scope".to_string(), vec![Matcher::glob("read*")]);
        let m = compile(MatcherValue::Form(fields));
        assert!(m.matches("grant_type=client_credentials&scope=read_only"));
        assert!(!m.matches("grant_type=password&scope=read_only"));
        assert!(!m.matches("scope=read_only"));
    }

    #[test]
    fn xml_equality_is_canonical() {
        let m = compile(MatcherValue::Xml("<a  b=\"1\" a=\"2\"><c/></a>".into()));
        assert!(m.matches("<a a=\"2\" b=\"1\">\n  <c></c>\n</a>"));
        assert!(!m.matches("<a a=\"2\" b=\"9\"><c/></a>"));
    }

    #[test]
    fn xml_path_extracts_and_chains() {
        let matcher = Matcher::new(MatcherValue::XmlPath("/order/item/text()".into()))
            .with_chained(Matcher::exact("widget"));
        let m = CompiledMatcher::compile(&matcher).unwrap();
        assert!(m.matches("<order><item>widget</item></order>"));
        assert!(!m.matches("<order><item>gadget</item></order>"));
    }

    #[test]
    fn jwt_matches_header_and_claims_without_verification() {
        // header {"alg":"HS256"} . payload {"sub":"ada"} . junk signature
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"ada","admin":true}"#);
        let token = format!("{header}.{payload}.sig-is-not-checked");

        let m = compile(MatcherValue::Jwt(json!({"payload": {"sub": "ada"}})));
        assert!(m.matches(&token));

        let miss = compile(MatcherValue::Jwt(json!({"payload": {"sub": "grace"}})));
        assert!(!miss.matches(&token));
        assert!(!m.matches("definitely.not.a.jwt"));
    }

    #[test]
    fn evaluation_errors_are_non_matches() {
        let m = compile(MatcherValue::JsonPath("$.a".into()));
        assert!(!m.matches("{broken"));
        let x = compile(MatcherValue::Xml("<a/>".into()));
        assert!(!x.matches("<unclosed"));
    }
}
