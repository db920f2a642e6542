//! Error types and synthetic response conversion.
//!
//! This module defines the application's error hierarchy and the conversion
//! rules that turn an error into the synthetic HTTP response a client sees.
//!
//! # Error Hierarchy
//!
//! The main [`Error`] enum covers all per-exchange error cases:
//!
//! - **Config errors**: malformed simulation, uncompilable matcher, bad
//!   template - fatal to the load operation that triggered them, never to
//!   the process (400 on the admin surface).
//! - **Match errors**: no pair matched the request - surfaced as a 502 with
//!   a closest-miss diagnostic body.
//! - **Upstream errors**: the forwarded request never produced a response -
//!   502 with a human-readable cause.
//! - **Middleware errors**: non-zero exit, bad output, or timeout - 502
//!   identifying the middleware.
//! - **Cache errors**: [`Error::BucketNotFound`] is structured so callers
//!   can distinguish "never existed" from real I/O failures.
//!
//! # Synthetic Responses
//!
//! Proxy-side failures must reach the client as an HTTP response, not a
//! dropped connection. [`Error::synthetic_response`] renders the error into
//! the canonical response model so the dispatcher can journal and emit it
//! like any other exchange.
//!
//! Admin API handlers return `Result<T, Error>`; the [`IntoResponse`]
//! implementation converts failures to JSON bodies with appropriate status
//! codes, logging at a severity tier matched to the error class.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::models::response::ResponseDetails;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed simulation, uncompilable matcher, or bad template.
    /// Fatal to the load that triggered it.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// No pair matched the request. Carries the closest-miss diagnostic
    /// produced by the matching engine.
    #[error("no match found for request")]
    NoMatch { diagnostic: String },

    /// Network failure while forwarding to the intended destination.
    #[error("could not forward request: {cause}")]
    Upstream { cause: String },

    /// Middleware exited non-zero, produced unusable output, or timed out.
    #[error("middleware {middleware} failed: {cause}")]
    Middleware { middleware: String, cause: String },

    /// Cache bucket was never created.
    #[error("bucket {bucket:?} not found")]
    BucketNotFound { bucket: String },

    /// Unrecoverable cache I/O.
    #[error("cache failure: {0}")]
    Cache(#[from] sled::Error),

    /// Requested resource is absent (admin surface).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Invalid admin request data.
    #[error("{message}")]
    BadRequest { message: String },

    /// Per-request deadline elapsed before the exchange completed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Unexpected error with full context chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config { .. } | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NoMatch { .. } | Error::Upstream { .. } | Error::Middleware { .. } => StatusCode::BAD_GATEWAY,
            Error::BucketNotFound { .. } | Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Error::Cache(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text for the synthetic response emitted by the proxy side.
    ///
    /// The middleware and upstream phrasings are load-bearing: clients and
    /// tests key off them to distinguish failure classes.
    pub fn synthetic_body(&self) -> String {
        match self {
            Error::NoMatch { diagnostic } => {
                format!("ricochet: no match found for request\n\n{diagnostic}")
            }
            Error::Upstream { cause } => {
                format!("ricochet: there was an error when forwarding the request to the intended destination\n\n{cause}")
            }
            Error::Middleware { middleware, cause } => {
                format!("ricochet: there was an error when executing middleware {middleware}\n\n{cause}")
            }
            Error::DeadlineExceeded => "ricochet: request deadline exceeded".to_string(),
            other => format!("ricochet: {other}"),
        }
    }

    /// Render the error as a response in the canonical model, for emission
    /// through the same egress path as simulated responses.
    pub fn synthetic_response(&self) -> ResponseDetails {
        let mut response = ResponseDetails::new(self.status_code().as_u16(), self.synthetic_body().into_bytes());
        response.headers.append("Content-Type", "text/plain");
        response
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Cache(_) | Error::Other(_) => {
                tracing::error!("internal error: {:#}", self);
            }
            Error::Upstream { .. } | Error::Middleware { .. } => {
                tracing::warn!("exchange error: {}", self);
            }
            Error::NoMatch { .. } => {
                tracing::debug!("matching error: {}", self);
            }
            _ => {
                tracing::debug!("client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody { error: self.to_string() };
        (status, axum::response::Json(body)).into_response()
    }
}

/// Type alias for operation results
pub type Result<T> = std::result::Result<T, Error>;
