//! Proxy ingress: the surface live traffic hits.
//!
//! A single fallback route accepts every method and path, parses the wire
//! request into the canonical model, and hands it to the dispatcher under
//! the per-request deadline. Both proxy-style requests (absolute-form URI)
//! and direct requests (destination taken from the `Host` header) are
//! accepted.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Error;
use crate::models::Headers;
use crate::models::request::{ParsedRequest, Scheme};
use crate::models::response::ResponseDetails;
use crate::modes::ModeDispatcher;

/// Request bodies beyond this are refused rather than buffered.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub dispatcher: Arc<ModeDispatcher>,
    pub deadline: Duration,
}

pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(state): State<ProxyState>, request: axum::extract::Request) -> Response {
    let parsed = match parse_incoming(request).await {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let response = match tokio::time::timeout(state.deadline, state.dispatcher.dispatch(parsed)).await {
        Ok(response) => response,
        Err(_) => Error::DeadlineExceeded.synthetic_response(),
    };

    to_wire(response)
}

/// Parse the axum request into the canonical model.
async fn parse_incoming(request: axum::extract::Request) -> Result<ParsedRequest, Response> {
    let (parts, body) = request.into_parts();

    let scheme = match parts.uri.scheme_str() {
        Some("https") => Scheme::Https,
        _ => Scheme::Http,
    };

    let destination = parts
        .uri
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            parts
                .headers
                .get(axum::http::header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let raw_path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = Headers::new();
    for (name, value) in parts.headers.iter() {
        headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }

    let body: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("refusing oversized or unreadable body: {e}");
            return Err(plain_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "ricochet: request body too large",
            ));
        }
    };

    Ok(ParsedRequest::new(parts.method.as_str(), scheme, destination, &raw_path)
        .with_headers(headers)
        .with_body(body))
}

/// Serialize the canonical response back onto the wire, preserving header
/// casing and raw body bytes.
fn to_wire(response: ResponseDetails) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);

    for (name, values) in response.headers.iter() {
        let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        for value in values {
            if let Ok(header_value) = HeaderValue::try_from(value.as_str()) {
                builder = builder.header(header_name.clone(), header_value);
            }
        }
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| plain_response(StatusCode::BAD_GATEWAY, "ricochet: could not serialize response"))
}

fn plain_response(status: StatusCode, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Body::from(body))
        .expect("static response must build")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn direct_requests_take_destination_from_host_header() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/orders?page=2")
            .header("Host", "shop.example.com")
            .header("X-Trace", "abc")
            .body(Body::from("payload"))
            .unwrap();

        let parsed = parse_incoming(request).await.unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.destination, "shop.example.com");
        assert_eq!(parsed.path, "/orders");
        assert_eq!(parsed.query.get("page"), Some(&vec!["2".to_string()]));
        assert_eq!(parsed.headers.get_first("x-trace"), Some("abc"));
        assert_eq!(parsed.body.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn absolute_form_requests_take_destination_from_the_uri() {
        let request = HttpRequest::builder()
            .method("GET")
            .uri("http://api.example.com:8080/v1/items")
            .body(Body::empty())
            .unwrap();

        let parsed = parse_incoming(request).await.unwrap();
        assert_eq!(parsed.destination, "api.example.com:8080");
        assert_eq!(parsed.scheme, Scheme::Http);
        assert_eq!(parsed.path, "/v1/items");
    }

    #[test]
    fn responses_keep_raw_bytes_and_header_casing() {
        let mut response = ResponseDetails::new(201, vec![0xde, 0xad]);
        response.headers.append("X-Custom-Header", "kept");

        let wire = to_wire(response);
        assert_eq!(wire.status(), StatusCode::CREATED);
        assert_eq!(wire.headers().get("x-custom-header").unwrap(), "kept");
    }
}
