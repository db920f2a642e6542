//! Canonical parsed representation of an incoming request.
//!
//! Parsing happens once on ingress. Path normalization collapses repeated
//! slashes and percent-decodes everything except encoded slashes (`%2F`),
//! which stay encoded because decoding them would change the segment
//! structure. Query parsing preserves duplicate keys and the value order
//! within each key. Form bodies are only parsed when a matcher or template
//! first asks for them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(format!("unknown scheme {other:?}")),
        }
    }
}

/// Ordered query multimap. Keys keep first-seen order; values keep
/// occurrence order within a key.
pub type QueryParams = IndexMap<String, Vec<String>>;

/// One live HTTP request, parsed into canonical form.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub scheme: Scheme,
    /// host[:port] the client addressed.
    pub destination: String,
    /// Decoded, normalized path.
    pub path: String,
    /// Path exactly as received on the wire.
    pub raw_path: String,
    pub query: QueryParams,
    pub headers: Headers,
    pub body: Bytes,
    pub timestamp: DateTime<Utc>,
    form: OnceCell<QueryParams>,
}

impl ParsedRequest {
    pub fn new(method: impl Into<String>, scheme: Scheme, destination: impl Into<String>, raw_path: &str) -> Self {
        let (path_part, query_part) = match raw_path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (raw_path, None),
        };
        ParsedRequest {
            method: method.into().to_ascii_uppercase(),
            scheme,
            destination: destination.into(),
            path: normalize_path(path_part),
            raw_path: raw_path.to_string(),
            query: query_part.map(parse_query).unwrap_or_default(),
            headers: Headers::new(),
            body: Bytes::new(),
            timestamp: Utc::now(),
            form: OnceCell::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Body interpreted as UTF-8, lossily. Matchers operate on this view.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Form fields, parsed from the body on first access. Returns an empty
    /// map unless the content type indicates a urlencoded form.
    pub fn form_data(&self) -> &QueryParams {
        self.form.get_or_init(|| {
            let is_form = self
                .headers
                .get_first("content-type")
                .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false);
            if !is_form {
                return QueryParams::default();
            }
            parse_query(&self.body_string())
        })
    }

    /// The query string re-encoded for forwarding, preserving order.
    pub fn query_string(&self) -> String {
        let flat: Vec<(&str, &str)> = self
            .query
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
            .collect();
        serde_urlencoded::to_string(flat).unwrap_or_default()
    }
}

/// Collapse repeated slashes and percent-decode, leaving `%2F` encoded and
/// preserving any trailing slash.
pub fn normalize_path(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for c in raw.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }

    percent_decode_except_slash(&collapsed)
}

fn percent_decode_except_slash(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) {
                let decoded = hi * 16 + lo;
                if decoded == b'/' {
                    // Encoded slashes are structural; keep them encoded.
                    out.extend_from_slice(&bytes[i..i + 3]);
                } else {
                    out.push(decoded);
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Parse a raw query (or urlencoded form body) into an ordered multimap.
pub fn parse_query(raw: &str) -> QueryParams {
    let mut params = QueryParams::default();
    if raw.is_empty() {
        return params;
    }
    for piece in raw.split('&') {
        if piece.is_empty() {
            continue;
        }
        let (key, value) = match piece.split_once('=') {
            Some((k, v)) => (k, v),
            None => (piece, ""),
        };
        let key = url_decode(key);
        let value = url_decode(value);
        params.entry(key).or_default().push(value);
    }
    params
}

fn url_decode(s: &str) -> String {
    let with_spaces = s.replace('+', " ");
    let bytes = with_spaces.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_slashes_collapse_and_trailing_slash_survives() {
        assert_eq!(normalize_path("//api///v1/users/"), "/api/v1/users/");
        assert_eq!(normalize_path("/plain"), "/plain");
    }

    #[test]
    fn percent_escapes_decode_except_encoded_slash() {
        assert_eq!(normalize_path("/a%20b"), "/a b");
        assert_eq!(normalize_path("/a%2Fb"), "/a%2Fb");
        assert_eq!(normalize_path("/a%2fb"), "/a%2fb");
    }

    #[test]
    fn query_preserves_duplicate_keys_in_order() {
        let q = parse_query("a=1&b=2&a=3");
        assert_eq!(q.get("a"), Some(&vec!["1".to_string(), "3".to_string()]));
        assert_eq!(q.get("b"), Some(&vec!["2".to_string()]));
        let keys: Vec<&String> = q.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn query_decodes_plus_and_percent() {
        let q = parse_query("name=hello+world&sym=%26");
        assert_eq!(q.get("name"), Some(&vec!["hello world".to_string()]));
        assert_eq!(q.get("sym"), Some(&vec!["&".to_string()]));
    }

    #[test]
    fn form_data_requires_urlencoded_content_type() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "application/x-www-form-urlencoded");
        let req = ParsedRequest::new("POST", Scheme::Http, "example.com", "/submit")
            .with_headers(headers)
            .with_body("field=value&field=other");
        assert_eq!(
            req.form_data().get("field"),
            Some(&vec!["value".to_string(), "other".to_string()])
        );

        let no_ct = ParsedRequest::new("POST", Scheme::Http, "example.com", "/submit").with_body("field=value");
        assert!(no_ct.form_data().is_empty());
    }

    #[test]
    fn request_splits_path_and_query() {
        let req = ParsedRequest::new("get", Scheme::Https, "example.com:8443", "/a//b?x=1&x=2");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/a/b");
        assert_eq!(req.raw_path, "/a//b?x=1&x=2");
        assert_eq!(req.query.get("x"), Some(&vec!["1".to_string(), "2".to_string()]));
    }
}
