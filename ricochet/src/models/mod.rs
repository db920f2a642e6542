//! Canonical data model for intercepted HTTP exchanges.
//!
//! Every live request is parsed exactly once on ingress into a
//! [`ParsedRequest`](request::ParsedRequest); every stored or upstream
//! response is represented as a
//! [`ResponseDetails`](response::ResponseDetails). All downstream components
//! (matching, templating, capture, journaling) operate on these types and
//! never on the raw wire representation.

pub mod request;
pub mod response;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Case-insensitive header multimap.
///
/// Lookup folds names to lowercase; the original casing of the first
/// occurrence is preserved for emission. Values keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(IndexMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `name`, matched case-insensitively.
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|vs| vs.first()).map(String::as_str)
    }

    /// Append a value, merging into an existing name regardless of casing.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some((_, values)) => values.push(value),
            None => {
                self.0.insert(name, vec![value]);
            }
        }
    }

    /// Replace all values for a name.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if let Some(existing) = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&name))
            .cloned()
        {
            self.0.shift_remove(&existing);
        }
        self.0.insert(name, values);
    }

    pub fn remove(&mut self, name: &str) {
        if let Some(existing) = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
        {
            self.0.shift_remove(&existing);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, values) in iter {
            for value in values {
                headers.append(name.clone(), value);
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_but_casing_is_preserved() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "application/json");
        headers.append("content-type", "text/plain");

        assert_eq!(
            headers.get("CONTENT-TYPE"),
            Some(&["application/json".to_string(), "text/plain".to_string()][..])
        );
        // Emission keeps the first-seen casing
        let names: Vec<&String> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Type"]);
    }

    #[test]
    fn missing_header_is_none() {
        let headers = Headers::new();
        assert_eq!(headers.get("X-Missing"), None);
    }
}
