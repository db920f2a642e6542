//! Response templating.
//!
//! Bodies marked `templated` are rendered through minijinja before emission.
//! The context exposes the live request (`Request.Path`,
//! `Request.QueryParam.<name>`, `Request.Header.<name>`, `Request.Body`,
//! `Request.Method`, `Request.Scheme`, `Request.FormData.<name>`), the state
//! bag (`State.<key>`), global literals and variables by name, and the
//! helper functions in [`helpers`]. Standard minijinja filters (`replace`,
//! `lower`, `upper`), arithmetic, `{% for %}` and `{% if %}` blocks are
//! available as-is.
//!
//! Unknown identifiers render to the empty string and log a warning; they
//! never fail the response. Parse errors are configuration errors and are
//! raised when the simulation loads, not when a request arrives. Compiled
//! templates are cached process-wide, keyed by source text.

pub mod helpers;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use minijinja::{Environment, UndefinedBehavior, Value as JinjaValue};
use moka::sync::Cache;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::request::ParsedRequest;
use crate::store::GlobalVariable;

const TEMPLATE_NAME: &str = "response";

static ENVIRONMENT_CACHE: Lazy<Cache<String, Arc<Environment<'static>>>> =
    Lazy::new(|| Cache::builder().max_capacity(512).build());

/// Injectable clock and RNG so tests can render deterministically.
pub struct TemplateRuntime {
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for TemplateRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemplateRuntime")
    }
}

impl Default for TemplateRuntime {
    fn default() -> Self {
        TemplateRuntime {
            clock: Box::new(Utc::now),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl TemplateRuntime {
    /// A runtime with a pinned clock and seeded RNG.
    pub fn fixed(now: DateTime<Utc>, seed: u64) -> Self {
        TemplateRuntime {
            clock: Box::new(move || now),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        f(&mut rng)
    }

    pub fn uuid(&self) -> Uuid {
        self.with_rng(|rng| uuid::Builder::from_random_bytes(rng.r#gen()).into_uuid())
    }
}

/// Check that a template parses. Called at simulation load.
pub fn validate(source: &str) -> Result<()> {
    environment_for(source).map(|_| ())
}

/// Check that a global variable references a known helper function.
pub fn validate_variable(function: &str) -> Result<()> {
    let normalized: String = function.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
    match normalized.as_str() {
        "now" | "nowadd" | "nowaddduration" | "randomuuid" | "randomint" | "randomstring" | "faker" => Ok(()),
        other => Err(Error::config(format!("unknown variable function {other:?}"))),
    }
}

/// The rendering entry point.
#[derive(Debug)]
pub struct Templater {
    runtime: Arc<TemplateRuntime>,
}

impl Templater {
    pub fn new(runtime: Arc<TemplateRuntime>) -> Self {
        Templater { runtime }
    }

    pub fn render(
        &self,
        source: &str,
        request: &ParsedRequest,
        state: &HashMap<String, String>,
        literals: &IndexMap<String, Value>,
        variables: &[GlobalVariable],
    ) -> Result<String> {
        let env = environment_for(source)?;
        let template = env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| Error::config(format!("template vanished from cache: {e}")))?;

        let mut context = Map::new();
        for (name, value) in literals {
            context.insert(name.clone(), value.clone());
        }
        for variable in variables {
            context.insert(variable.name.clone(), self.evaluate_variable(variable));
        }
        context.insert("Request".to_string(), request_context(request));
        context.insert("State".to_string(), json!(state));

        warn_on_unknown_identifiers(&template, &context);

        let mut jinja_ctx = JinjaValue::from_serialize(&Value::Object(context));
        jinja_ctx = merge_runtime(jinja_ctx, self.runtime.clone());

        template
            .render(jinja_ctx)
            .map_err(|e| Error::Other(anyhow::anyhow!("failed to render response template: {e}")))
    }

    /// Evaluate one global variable to a JSON value using the runtime.
    fn evaluate_variable(&self, variable: &GlobalVariable) -> Value {
        let arg_str = |i: usize| -> Option<String> {
            variable.arguments.get(i).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };
        let normalized: String = variable
            .function
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "now" => json!(self.runtime.now().to_rfc3339()),
            "nowadd" | "nowaddduration" => {
                let offset = arg_str(0)
                    .and_then(|d| humantime::parse_duration(&d).ok())
                    .and_then(|d| chrono::Duration::from_std(d).ok())
                    .unwrap_or_else(chrono::Duration::zero);
                json!((self.runtime.now() + offset).to_rfc3339())
            }
            "randomuuid" => json!(self.runtime.uuid().to_string()),
            "randomint" => {
                let min = variable.arguments.first().and_then(Value::as_i64).unwrap_or(0);
                let max = variable.arguments.get(1).and_then(Value::as_i64).unwrap_or(i64::MAX - 1);
                if min > max {
                    return json!(min);
                }
                json!(self.runtime.with_rng(|rng| rng.gen_range(min..=max)))
            }
            "randomstring" => {
                let length = variable.arguments.first().and_then(Value::as_u64).unwrap_or(8) as usize;
                json!(self.runtime.with_rng(|rng| {
                    (0..length)
                        .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
                        .collect::<String>()
                }))
            }
            "faker" => {
                let category = arg_str(0).unwrap_or_default();
                json!(self.runtime.with_rng(|rng| helpers::fake_value(&category, rng)))
            }
            // validate_variable rejects anything else at load
            _ => Value::Null,
        }
    }
}

/// Compile (or fetch the cached) environment holding this template source.
fn environment_for(source: &str) -> Result<Arc<Environment<'static>>> {
    if let Some(env) = ENVIRONMENT_CACHE.get(source) {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    helpers::register(&mut env);
    env.add_template_owned(TEMPLATE_NAME.to_string(), source.to_string())
        .map_err(|e| Error::config(format!("invalid response template: {e}")))?;

    let env = Arc::new(env);
    ENVIRONMENT_CACHE.insert(source.to_string(), env.clone());
    Ok(env)
}

fn request_context(request: &ParsedRequest) -> Value {
    let multimap = |entries: Box<dyn Iterator<Item = (&String, &Vec<String>)> + '_>| -> Value {
        let mut map = Map::new();
        for (name, values) in entries {
            let value = if values.len() == 1 {
                json!(values[0])
            } else {
                json!(values)
            };
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    };

    json!({
        "Path": request.path,
        "Method": request.method,
        "Scheme": request.scheme.to_string(),
        "Destination": request.destination,
        "Body": request.body_string(),
        "QueryParam": multimap(Box::new(request.query.iter())),
        "Header": multimap(Box::new(request.headers.iter())),
        "FormData": multimap(Box::new(request.form_data().iter())),
    })
}

fn warn_on_unknown_identifiers(template: &minijinja::Template<'_, '_>, context: &Map<String, Value>) {
    let known: HashSet<&str> = context.keys().map(String::as_str).collect();
    for name in template.undeclared_variables(false) {
        if !known.contains(name.as_str()) && name != helpers::runtime_key() {
            tracing::warn!(identifier = %name, "unknown template identifier renders empty");
        }
    }
}

/// Attach the runtime handle to an already-built context value.
fn merge_runtime(context: JinjaValue, runtime: Arc<TemplateRuntime>) -> JinjaValue {
    minijinja::context! {
        __runtime => helpers::runtime_value(runtime),
        ..context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Headers;
    use crate::models::request::Scheme;
    use chrono::TimeZone;

    fn templater() -> Templater {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Templater::new(Arc::new(TemplateRuntime::fixed(now, 42)))
    }

    fn sample_request() -> ParsedRequest {
        let mut headers = Headers::new();
        headers.append("X-Request-Id", "req-1");
        ParsedRequest::new("POST", Scheme::Https, "api.example.com", "/orders?sort=asc&tag=a&tag=b")
            .with_headers(headers)
            .with_body(r#"{"item":"widget"}"#)
    }

    #[test]
    fn request_fields_render() {
        let out = templater()
            .render(
                "{{ Request.Method }} {{ Request.Path }} sort={{ Request.QueryParam.sort }} id={{ Request.Header['X-Request-Id'] }}",
                &sample_request(),
                &HashMap::new(),
                &IndexMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(out, "POST /orders sort=asc id=req-1");
    }

    #[test]
    fn state_and_literals_render() {
        let mut state = HashMap::new();
        state.insert("session".to_string(), "open".to_string());
        let mut literals = IndexMap::new();
        literals.insert("greeting".to_string(), json!("hello"));

        let out = templater()
            .render(
                "{{ greeting }} session={{ State.session }}",
                &sample_request(),
                &state,
                &literals,
                &[],
            )
            .unwrap();
        assert_eq!(out, "hello session=open");
    }

    #[test]
    fn unknown_identifiers_render_empty_without_failing() {
        let out = templater()
            .render(
                "[{{ definitely_not_defined }}]",
                &sample_request(),
                &HashMap::new(),
                &IndexMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn helpers_are_deterministic_with_a_fixed_runtime() {
        let out = templater()
            .render(
                "{{ now() }}|{{ random_int(1, 6) }}",
                &sample_request(),
                &HashMap::new(),
                &IndexMap::new(),
                &[],
            )
            .unwrap();
        assert!(out.starts_with("2024-06-01T12:00:00"));
        let roll: i64 = out.rsplit('|').next().unwrap().parse().unwrap();
        assert!((1..=6).contains(&roll));
    }

    #[test]
    fn variables_evaluate_per_render() {
        let variables = vec![GlobalVariable {
            name: "session_id".to_string(),
            function: "randomUuid".to_string(),
            arguments: vec![],
        }];
        let out = templater()
            .render("id={{ session_id }}", &sample_request(), &HashMap::new(), &IndexMap::new(), &variables)
            .unwrap();
        assert!(out.starts_with("id="));
        assert_eq!(out.len(), 3 + 36);
    }

    #[test]
    fn parse_errors_are_config_errors() {
        let err = validate("{% if unclosed").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn iteration_and_conditionals_work() {
        let out = templater()
            .render(
                "{% for tag in Request.QueryParam.tag %}{{ tag }};{% endfor %}{% if Request.Method == \"POST\" %}posted{% endif %}",
                &sample_request(),
                &HashMap::new(),
                &IndexMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(out, "a;b;posted");
    }

    #[test]
    fn builtin_filters_cover_replace_and_case() {
        let out = templater()
            .render(
                "{{ Request.Path | upper }} {{ \"a-b\" | replace(\"-\", \"_\") }}",
                &sample_request(),
                &HashMap::new(),
                &IndexMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(out, "/ORDERS a_b");
    }
}
