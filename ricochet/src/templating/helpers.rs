//! Template helper functions: time, randomness, and fake data.
//!
//! Helpers that touch the clock or RNG go through the [`TemplateRuntime`]
//! handle stashed in the render context, so tests can pin both.

use chrono::Duration as ChronoDuration;
use fake::Fake;
use fake::faker::address::en::{CityName, CountryName};
use fake::faker::internet::en::{FreeEmail, Username};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use minijinja::value::{Object, Value};
use minijinja::{Environment, Error, ErrorKind, State};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;
use std::sync::Arc;

use super::TemplateRuntime;

const RUNTIME_KEY: &str = "__runtime";

/// Wrapper that lets the runtime ride through a minijinja context value.
pub(crate) struct RuntimeHandle(pub Arc<TemplateRuntime>);

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuntimeHandle")
    }
}

impl Object for RuntimeHandle {}

pub(crate) fn runtime_value(runtime: Arc<TemplateRuntime>) -> Value {
    Value::from_object(RuntimeHandle(runtime))
}

pub(crate) fn runtime_key() -> &'static str {
    RUNTIME_KEY
}

fn runtime_from(state: &State) -> Result<Arc<TemplateRuntime>, Error> {
    state
        .lookup(RUNTIME_KEY)
        .as_ref()
        .and_then(|v| v.downcast_object_ref::<RuntimeHandle>().map(|h| h.0.clone()))
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "template runtime not available"))
}

/// Register every helper, under both snake_case and the camelCase spellings
/// simulations tend to use.
pub fn register(env: &mut Environment<'static>) {
    env.add_function("now", now);
    for name in ["now_add", "nowAdd", "nowAddDuration"] {
        env.add_function(name, now_add);
    }
    for name in ["random_uuid", "randomUuid"] {
        env.add_function(name, random_uuid);
    }
    for name in ["random_int", "randomInt"] {
        env.add_function(name, random_int);
    }
    for name in ["random_string", "randomString"] {
        env.add_function(name, random_string);
    }
    env.add_function("faker", faker);
}

fn now(state: &State, format: Option<String>) -> Result<String, Error> {
    let runtime = runtime_from(state)?;
    Ok(format_time(runtime.now(), format.as_deref()))
}

fn now_add(state: &State, duration: String, format: Option<String>) -> Result<String, Error> {
    let runtime = runtime_from(state)?;
    let offset = humantime::parse_duration(&duration)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("bad duration {duration:?}: {e}")))?;
    let offset = ChronoDuration::from_std(offset)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("duration out of range: {e}")))?;
    Ok(format_time(runtime.now() + offset, format.as_deref()))
}

fn format_time(time: chrono::DateTime<chrono::Utc>, format: Option<&str>) -> String {
    match format {
        Some(fmt) => time.format(fmt).to_string(),
        None => time.to_rfc3339(),
    }
}

fn random_uuid(state: &State) -> Result<String, Error> {
    let runtime = runtime_from(state)?;
    Ok(runtime.uuid().to_string())
}

fn random_int(state: &State, min: i64, max: i64) -> Result<i64, Error> {
    if min > max {
        return Err(Error::new(ErrorKind::InvalidOperation, "random_int: min exceeds max"));
    }
    let runtime = runtime_from(state)?;
    Ok(runtime.with_rng(|rng| rng.gen_range(min..=max)))
}

fn random_string(state: &State, length: u32) -> Result<String, Error> {
    let runtime = runtime_from(state)?;
    Ok(runtime.with_rng(|rng| {
        (0..length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }))
}

fn faker(state: &State, category: String) -> Result<String, Error> {
    let runtime = runtime_from(state)?;
    Ok(runtime.with_rng(|rng| fake_value(&category, rng)))
}

/// Generate one fake value by category name. Unknown categories render
/// empty and warn, mirroring unknown-identifier behavior.
pub(crate) fn fake_value<R: Rng>(category: &str, rng: &mut R) -> String {
    let normalized: String = category.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
    match normalized.as_str() {
        "name" => Name().fake_with_rng(rng),
        "firstname" => FirstName().fake_with_rng(rng),
        "lastname" => LastName().fake_with_rng(rng),
        "email" => FreeEmail().fake_with_rng(rng),
        "username" => Username().fake_with_rng(rng),
        "city" => CityName().fake_with_rng(rng),
        "country" => CountryName().fake_with_rng(rng),
        "phonenumber" | "phone" => PhoneNumber().fake_with_rng(rng),
        other => {
            tracing::warn!(category = other, "unknown faker category, rendering empty");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn fake_values_are_deterministic_under_a_seed() {
        let a: String = fake_value("email", &mut StdRng::seed_from_u64(42));
        let b: String = fake_value("email", &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!(a.contains('@'));
    }

    #[test]
    fn unknown_faker_category_renders_empty() {
        assert_eq!(fake_value("flux_capacitor", &mut StdRng::seed_from_u64(1)), "");
    }
}
