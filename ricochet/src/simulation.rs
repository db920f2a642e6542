//! Simulation wire format: JSON views, schema versions v1–v5, and the
//! conversions between wire views and the domain model.
//!
//! v5 is the canonical schema: every request field is a list of
//! `{matcher, value}` entries. Earlier versions expressed request fields as
//! scalars (optionally glob-style for v1 "template" pairs); they are
//! accepted on import and up-converted. Export always emits v5;
//! down-conversion to the scalar schemas is lossy and best-effort.
//!
//! This module also defines the concrete (non-matcher) exchange views used
//! for middleware payloads, journal entries, and capture fingerprints.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::matching::matchers::{Matcher, MatcherValue};
use crate::matching::{Pair, RequestMatcher};
use crate::models::Headers;
use crate::models::request::ParsedRequest;
use crate::models::response::{LogNormalDelay, PostActionHook, ResponseDetails};
use crate::store::{GlobalDelay, GlobalLiteral, GlobalVariable, Simulation};

pub const CANONICAL_SCHEMA_VERSION: &str = "v5";

// ---------------------------------------------------------------------------
// v5 views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationView {
    pub data: DataView,
    pub meta: MetaView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataView {
    pub pairs: Vec<PairView>,
    #[serde(rename = "globalActions", default)]
    pub global_actions: GlobalActionsView,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<GlobalLiteralView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<GlobalVariableView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalActionsView {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delays: Vec<GlobalDelayView>,
    #[serde(rename = "delaysLogNormal", default, skip_serializing_if = "Vec::is_empty")]
    pub delays_log_normal: Vec<GlobalLogNormalDelayView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<PostActionHook>,
}

/// A fixed delay applied to every matched response whose URL and method
/// fit the filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalDelayView {
    #[serde(rename = "urlPattern", default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(rename = "httpMethod", default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(rename = "delay", default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalLogNormalDelayView {
    #[serde(rename = "urlPattern", default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(rename = "httpMethod", default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(flatten)]
    pub delay: LogNormalDelay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaView {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "hoverflyVersion", default)]
    pub hoverfly_version: String,
    #[serde(rename = "timeExported", default)]
    pub time_exported: String,
}

impl MetaView {
    pub fn current(now: DateTime<Utc>) -> Self {
        MetaView {
            schema_version: CANONICAL_SCHEMA_VERSION.to_string(),
            hoverfly_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            time_exported: now.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairView {
    pub request: RequestMatcherView,
    pub response: ResponseView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMatcherView {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<MatcherView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method: Vec<MatcherView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination: Vec<MatcherView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scheme: Vec<MatcherView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<MatcherView>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, Vec<MatcherView>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub query: IndexMap<String, Vec<MatcherView>>,
    #[serde(rename = "requiresState", default, skip_serializing_if = "HashMap::is_empty")]
    pub requires_state: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherView {
    pub matcher: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    #[serde(rename = "doMatch", default, skip_serializing_if = "Option::is_none")]
    pub do_match: Option<Box<MatcherView>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseView {
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "encodedBody", default)]
    pub encoded_body: bool,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default)]
    pub templated: bool,
    #[serde(rename = "transitionsState", default, skip_serializing_if = "HashMap::is_empty")]
    pub transitions_state: HashMap<String, String>,
    #[serde(rename = "removesState", default, skip_serializing_if = "Vec::is_empty")]
    pub removes_state: Vec<String>,
    #[serde(rename = "fixedDelay", default, skip_serializing_if = "is_zero")]
    pub fixed_delay: u64,
    #[serde(rename = "logNormalDelay", default, skip_serializing_if = "Option::is_none")]
    pub log_normal_delay: Option<LogNormalDelay>,
    #[serde(rename = "postActionHooks", default, skip_serializing_if = "Vec::is_empty")]
    pub post_action_hooks: Vec<PostActionHook>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLiteralView {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariableView {
    pub name: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Parse a simulation document of any supported schema version into the
/// domain model. The version is read from `meta.schemaVersion`; pre-v5
/// documents are up-converted.
pub fn parse_simulation(raw: &str) -> Result<Simulation> {
    let document: Value = serde_json::from_str(raw).map_err(|e| Error::config(format!("malformed simulation JSON: {e}")))?;

    let version = document
        .pointer("/meta/schemaVersion")
        .and_then(Value::as_str)
        .unwrap_or(CANONICAL_SCHEMA_VERSION)
        .to_string();

    match version.as_str() {
        "v5" => {
            let view: SimulationView =
                serde_json::from_value(document).map_err(|e| Error::config(format!("invalid v5 simulation: {e}")))?;
            simulation_from_view(view)
        }
        "v1" | "v2" | "v3" | "v4" => {
            let view: LegacySimulationView =
                serde_json::from_value(document).map_err(|e| Error::config(format!("invalid {version} simulation: {e}")))?;
            simulation_from_legacy(view)
        }
        other => Err(Error::config(format!("unsupported schema version {other:?}"))),
    }
}

pub fn simulation_from_view(view: SimulationView) -> Result<Simulation> {
    let mut pairs = Vec::with_capacity(view.data.pairs.len());
    for pair in view.data.pairs {
        pairs.push(Pair {
            matcher: request_matcher_from_view(pair.request)?,
            response: response_from_view(pair.response)?,
        });
    }
    Ok(Simulation {
        pairs,
        global_delays: global_delays_from_view(&view.data.global_actions),
        global_actions: view.data.global_actions.hooks,
        literals: view
            .data
            .literals
            .into_iter()
            .map(|l| GlobalLiteral { name: l.name, value: l.value })
            .collect(),
        variables: view
            .data
            .variables
            .into_iter()
            .map(|v| GlobalVariable {
                name: v.name,
                function: v.function,
                arguments: v.arguments,
            })
            .collect(),
    })
}

fn global_delays_from_view(actions: &GlobalActionsView) -> Vec<GlobalDelay> {
    let mut delays: Vec<GlobalDelay> = actions
        .delays
        .iter()
        .map(|d| GlobalDelay {
            url_pattern: d.url_pattern.clone(),
            http_method: d.http_method.clone(),
            delay_ms: d.delay_ms,
            log_normal: None,
        })
        .collect();
    delays.extend(actions.delays_log_normal.iter().map(|d| GlobalDelay {
        url_pattern: d.url_pattern.clone(),
        http_method: d.http_method.clone(),
        delay_ms: 0,
        log_normal: Some(d.delay),
    }));
    delays
}

fn request_matcher_from_view(view: RequestMatcherView) -> Result<RequestMatcher> {
    fn convert_all(views: Vec<MatcherView>) -> Result<Vec<Matcher>> {
        views.into_iter().map(matcher_from_view).collect()
    }
    fn convert_map(map: IndexMap<String, Vec<MatcherView>>) -> Result<IndexMap<String, Vec<Matcher>>> {
        map.into_iter()
            .map(|(name, views)| Ok((name, convert_all(views)?)))
            .collect()
    }

    Ok(RequestMatcher {
        path: convert_all(view.path)?,
        method: convert_all(view.method)?,
        destination: convert_all(view.destination)?,
        scheme: convert_all(view.scheme)?,
        body: convert_all(view.body)?,
        headers: convert_map(view.headers)?,
        query: convert_map(view.query)?,
        requires_state: view.requires_state,
    })
}

pub fn matcher_from_view(view: MatcherView) -> Result<Matcher> {
    let as_string = |value: &Value| -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    };

    let kind = view.matcher.to_ascii_lowercase();
    let value = match kind.as_str() {
        "exact" => MatcherValue::Exact(as_string(&view.value)),
        "glob" => MatcherValue::Glob(as_string(&view.value)),
        "regex" => MatcherValue::Regex(as_string(&view.value)),
        "contains" => MatcherValue::Contains(as_string(&view.value)),
        "form" => MatcherValue::Form(form_fields_from_value(view.value)?),
        "jsonpartial" | "json" => MatcherValue::JsonPartial(json_value(view.value)?),
        "jsonpath" => MatcherValue::JsonPath(as_string(&view.value)),
        "xml" => MatcherValue::Xml(as_string(&view.value)),
        "xmlpath" | "xpath" => MatcherValue::XmlPath(as_string(&view.value)),
        "jwt" => MatcherValue::Jwt(json_value(view.value)?),
        other => return Err(Error::config(format!("unknown matcher kind {other:?}"))),
    };

    let mut matcher = Matcher::new(value);
    if let Some(inner) = view.do_match {
        matcher = matcher.with_chained(matcher_from_view(*inner)?);
    }
    Ok(matcher)
}

/// A JSON-kind matcher value may arrive as a JSON document in a string, or
/// as inline JSON.
fn json_value(value: Value) -> Result<Value> {
    match value {
        Value::String(s) => serde_json::from_str(&s).map_err(|e| Error::config(format!("matcher value is not JSON: {e}"))),
        inline => Ok(inline),
    }
}

/// Form matcher values: `{field: [matcher entries]}` canonically, with
/// `{field: "scalar"}` accepted as shorthand for an exact match.
fn form_fields_from_value(value: Value) -> Result<IndexMap<String, Vec<Matcher>>> {
    let Value::Object(fields) = value else {
        return Err(Error::config("form matcher value must be an object"));
    };
    let mut out = IndexMap::new();
    for (name, field_value) in fields {
        let matchers = match field_value {
            Value::String(s) => vec![Matcher::exact(s)],
            Value::Array(entries) => entries
                .into_iter()
                .map(|entry| {
                    let view: MatcherView = serde_json::from_value(entry)
                        .map_err(|e| Error::config(format!("bad form field matcher: {e}")))?;
                    matcher_from_view(view)
                })
                .collect::<Result<Vec<_>>>()?,
            other => return Err(Error::config(format!("bad form field value {other}"))),
        };
        out.insert(name, matchers);
    }
    Ok(out)
}

fn response_from_view(view: ResponseView) -> Result<ResponseDetails> {
    let body = if view.encoded_body {
        BASE64
            .decode(view.body.as_bytes())
            .map_err(|e| Error::config(format!("encoded body is not valid base64: {e}")))?
    } else {
        view.body.into_bytes()
    };

    Ok(ResponseDetails {
        status: view.status,
        headers: view.headers,
        body: body.into(),
        encoded_body: view.encoded_body,
        templated: view.templated,
        transitions_state: view.transitions_state,
        removes_state: view.removes_state,
        fixed_delay: Duration::from_millis(view.fixed_delay),
        log_normal_delay: view.log_normal_delay,
        post_action_hooks: view.post_action_hooks,
    })
}

// ---------------------------------------------------------------------------
// Legacy (v1–v4) import
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct LegacySimulationView {
    data: LegacyDataView,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyDataView {
    #[serde(default)]
    pairs: Vec<LegacyPairView>,
    #[serde(rename = "globalActions", default)]
    global_actions: GlobalActionsView,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyPairView {
    request: LegacyRequestView,
    response: ResponseView,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyRequestView {
    #[serde(rename = "requestType", default)]
    request_type: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    scheme: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    headers: IndexMap<String, Vec<String>>,
}

fn simulation_from_legacy(view: LegacySimulationView) -> Result<Simulation> {
    let mut pairs = Vec::with_capacity(view.data.pairs.len());
    for pair in view.data.pairs {
        pairs.push(Pair {
            matcher: upconvert_request(pair.request),
            response: response_from_view(pair.response)?,
        });
    }
    Ok(Simulation {
        pairs,
        global_delays: global_delays_from_view(&view.data.global_actions),
        global_actions: view.data.global_actions.hooks,
        literals: Vec::new(),
        variables: Vec::new(),
    })
}

/// Pre-v5 scalar fields become single-entry matcher lists. "template"
/// pairs matched loosely, so their fields up-convert to globs; recordings
/// up-convert to exact matchers.
fn upconvert_request(legacy: LegacyRequestView) -> RequestMatcher {
    let globby = legacy.request_type.as_deref() == Some("template");
    let lift = |field: Option<String>| -> Vec<Matcher> {
        match field {
            Some(value) if globby => vec![Matcher::glob(value)],
            Some(value) => vec![Matcher::exact(value)],
            None => Vec::new(),
        }
    };

    let mut matcher = RequestMatcher {
        path: lift(legacy.path),
        method: lift(legacy.method),
        destination: lift(legacy.destination),
        scheme: lift(legacy.scheme),
        body: lift(legacy.body),
        ..Default::default()
    };

    if let Some(raw_query) = legacy.query {
        for (name, values) in crate::models::request::parse_query(&raw_query) {
            let entry: Vec<Matcher> = values
                .into_iter()
                .map(|v| if globby { Matcher::glob(v) } else { Matcher::exact(v) })
                .collect();
            matcher.query.insert(name, entry);
        }
    }
    for (name, values) in legacy.headers {
        matcher
            .headers
            .insert(name, values.into_iter().map(Matcher::exact).collect());
    }
    matcher
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Render the domain model back to the canonical v5 wire view.
pub fn simulation_to_view(simulation: &Simulation, now: DateTime<Utc>) -> SimulationView {
    SimulationView {
        data: DataView {
            pairs: simulation
                .pairs
                .iter()
                .map(|pair| PairView {
                    request: request_matcher_to_view(&pair.matcher),
                    response: response_to_view(&pair.response),
                })
                .collect(),
            global_actions: GlobalActionsView {
                delays: simulation
                    .global_delays
                    .iter()
                    .filter(|d| d.log_normal.is_none())
                    .map(|d| GlobalDelayView {
                        url_pattern: d.url_pattern.clone(),
                        http_method: d.http_method.clone(),
                        delay_ms: d.delay_ms,
                    })
                    .collect(),
                delays_log_normal: simulation
                    .global_delays
                    .iter()
                    .filter_map(|d| {
                        d.log_normal.map(|delay| GlobalLogNormalDelayView {
                            url_pattern: d.url_pattern.clone(),
                            http_method: d.http_method.clone(),
                            delay,
                        })
                    })
                    .collect(),
                hooks: simulation.global_actions.clone(),
            },
            literals: simulation
                .literals
                .iter()
                .map(|l| GlobalLiteralView {
                    name: l.name.clone(),
                    value: l.value.clone(),
                })
                .collect(),
            variables: simulation
                .variables
                .iter()
                .map(|v| GlobalVariableView {
                    name: v.name.clone(),
                    function: v.function.clone(),
                    arguments: v.arguments.clone(),
                })
                .collect(),
        },
        meta: MetaView::current(now),
    }
}

fn request_matcher_to_view(matcher: &RequestMatcher) -> RequestMatcherView {
    let convert_all = |ms: &[Matcher]| -> Vec<MatcherView> { ms.iter().map(matcher_to_view).collect() };
    let convert_map = |map: &IndexMap<String, Vec<Matcher>>| -> IndexMap<String, Vec<MatcherView>> {
        map.iter().map(|(name, ms)| (name.clone(), convert_all(ms))).collect()
    };

    RequestMatcherView {
        path: convert_all(&matcher.path),
        method: convert_all(&matcher.method),
        destination: convert_all(&matcher.destination),
        scheme: convert_all(&matcher.scheme),
        body: convert_all(&matcher.body),
        headers: convert_map(&matcher.headers),
        query: convert_map(&matcher.query),
        requires_state: matcher.requires_state.clone(),
    }
}

pub fn matcher_to_view(matcher: &Matcher) -> MatcherView {
    let (kind, value) = match &matcher.value {
        MatcherValue::Exact(v) => ("exact", Value::String(v.clone())),
        MatcherValue::Glob(v) => ("glob", Value::String(v.clone())),
        MatcherValue::Regex(v) => ("regex", Value::String(v.clone())),
        MatcherValue::Contains(v) => ("contains", Value::String(v.clone())),
        MatcherValue::Form(fields) => {
            let mut object = Map::new();
            for (name, ms) in fields {
                object.insert(
                    name.clone(),
                    Value::Array(ms.iter().map(|m| serde_json::to_value(matcher_to_view(m)).unwrap_or(Value::Null)).collect()),
                );
            }
            ("form", Value::Object(object))
        }
        MatcherValue::JsonPartial(v) => ("jsonpartial", v.clone()),
        MatcherValue::JsonPath(v) => ("jsonpath", Value::String(v.clone())),
        MatcherValue::Xml(v) => ("xml", Value::String(v.clone())),
        MatcherValue::XmlPath(v) => ("xmlpath", Value::String(v.clone())),
        MatcherValue::Jwt(v) => ("jwt", v.clone()),
    };

    MatcherView {
        matcher: kind.to_string(),
        value,
        config: None,
        do_match: matcher.chained.as_ref().map(|inner| Box::new(matcher_to_view(inner))),
    }
}

pub fn response_to_view(response: &ResponseDetails) -> ResponseView {
    let (body, encoded_body) = match std::str::from_utf8(&response.body) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (BASE64.encode(&response.body), true),
    };

    ResponseView {
        status: response.status,
        body,
        encoded_body,
        headers: response.headers.clone(),
        templated: response.templated,
        transitions_state: response.transitions_state.clone(),
        removes_state: response.removes_state.clone(),
        fixed_delay: response.fixed_delay.as_millis() as u64,
        log_normal_delay: response.log_normal_delay,
        post_action_hooks: response.post_action_hooks.clone(),
    }
}

/// Render a simulation at a pre-v5 schema version. Lossy by nature: only
/// the first exact or glob matcher of each dimension survives as a scalar
/// field, and v5-only response features are dropped where the target
/// version predates them.
pub fn simulation_to_legacy_value(simulation: &Simulation, version: &str) -> Value {
    let scalar_of = |matchers: &[Matcher]| -> Option<(String, bool)> {
        matchers.iter().find_map(|m| match &m.value {
            MatcherValue::Exact(v) => Some((v.clone(), false)),
            MatcherValue::Glob(v) => Some((v.clone(), true)),
            _ => None,
        })
    };

    let pairs: Vec<Value> = simulation
        .pairs
        .iter()
        .map(|pair| {
            let matcher = &pair.matcher;
            let mut request = Map::new();
            let mut any_glob = false;

            for (field, matchers) in [
                ("path", &matcher.path),
                ("method", &matcher.method),
                ("destination", &matcher.destination),
                ("scheme", &matcher.scheme),
                ("body", &matcher.body),
            ] {
                if let Some((value, globby)) = scalar_of(matchers) {
                    any_glob |= globby;
                    request.insert(field.to_string(), Value::String(value));
                }
            }

            let query: Vec<String> = matcher
                .query
                .iter()
                .flat_map(|(name, matchers)| scalar_of(matchers).map(|(value, _)| format!("{name}={value}")))
                .collect();
            if !query.is_empty() {
                request.insert("query".to_string(), Value::String(query.join("&")));
            }

            let headers: Map<String, Value> = matcher
                .headers
                .iter()
                .filter_map(|(name, matchers)| {
                    scalar_of(matchers).map(|(value, _)| (name.clone(), serde_json::json!([value])))
                })
                .collect();
            if !headers.is_empty() {
                request.insert("headers".to_string(), Value::Object(headers));
            }

            if version == "v1" {
                let request_type = if any_glob { "template" } else { "recording" };
                request.insert("requestType".to_string(), Value::String(request_type.to_string()));
            }

            let view = response_to_view(&pair.response);
            let response = serde_json::json!({
                "status": view.status,
                "body": view.body,
                "encodedBody": view.encoded_body,
                "headers": view.headers,
            });

            serde_json::json!({ "request": Value::Object(request), "response": response })
        })
        .collect();

    serde_json::json!({
        "data": { "pairs": pairs, "globalActions": {} },
        "meta": {
            "schemaVersion": version,
            "hoverflyVersion": format!("v{}", env!("CARGO_PKG_VERSION")),
            "timeExported": "",
        }
    })
}

// ---------------------------------------------------------------------------
// Concrete exchange views (middleware payloads, journal, fingerprints)
// ---------------------------------------------------------------------------

/// A live request rendered as plain values, not matchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestView {
    pub method: String,
    pub scheme: String,
    pub destination: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub query: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl RequestView {
    pub fn from_request(request: &ParsedRequest) -> Self {
        RequestView {
            method: request.method.clone(),
            scheme: request.scheme.to_string(),
            destination: request.destination.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body_string(),
            headers: request.headers.clone(),
        }
    }

    /// The fingerprint view excludes headers: proxies and clients inject
    /// per-hop headers that would break replay key stability.
    pub fn fingerprint_view(&self) -> Value {
        serde_json::json!({
            "method": self.method,
            "scheme": self.scheme,
            "destination": self.destination,
            "path": self.path,
            "query": self.query,
            "body": self.body,
        })
    }
}

/// One full exchange as handed to middleware and hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeView {
    pub request: RequestView,
    pub response: ResponseView,
}

impl ExchangeView {
    pub fn new(request: &ParsedRequest, response: &ResponseDetails) -> Self {
        ExchangeView {
            request: RequestView::from_request(request),
            response: response_to_view(response),
        }
    }

    pub fn into_response(self) -> Result<ResponseDetails> {
        response_from_view(self.response)
    }
}

/// A captured pair as persisted in the cache: the up-converted matcher
/// plus the concrete request it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedPairView {
    pub request: RequestView,
    pub matcher: RequestMatcherView,
    pub response: ResponseView,
}

impl CapturedPairView {
    pub fn new(request: &ParsedRequest, pair: &Pair) -> Self {
        CapturedPairView {
            request: RequestView::from_request(request),
            matcher: request_matcher_to_view(&pair.matcher),
            response: response_to_view(&pair.response),
        }
    }

    pub fn into_pair(self) -> Result<Pair> {
        Ok(Pair {
            matcher: request_matcher_from_view(self.matcher)?,
            response: response_from_view(self.response)?,
        })
    }
}
