//! Middleware: external transformers applied to a request/response pair.
//!
//! Two variants. **Binary** middleware is a local executable: the pair is
//! written to its standard input as JSON and the replacement pair is read
//! from its standard output. **Remote** middleware is an HTTP service: the
//! pair is POSTed as JSON and the response body is the replacement.
//!
//! Either way the middleware gets one configurable timeout. A non-zero
//! exit, unusable output, non-2xx status, or timeout is a middleware
//! failure, which aborts the exchange with a 502-class synthetic response.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use url::Url;

use crate::errors::{Error, Result};
use crate::simulation::ExchangeView;

#[derive(Debug, Clone)]
pub enum MiddlewareSpec {
    Binary { command: String, args: Vec<String> },
    Remote { url: Url },
}

#[derive(Debug)]
pub struct Middleware {
    spec: MiddlewareSpec,
    timeout: Duration,
    client: reqwest::Client,
}

impl Middleware {
    pub fn new(spec: MiddlewareSpec, timeout: Duration) -> Self {
        Middleware {
            spec,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Identifier used in synthetic error bodies.
    pub fn describe(&self) -> String {
        match &self.spec {
            MiddlewareSpec::Binary { command, .. } => command.clone(),
            MiddlewareSpec::Remote { url } => url.to_string(),
        }
    }

    /// Run the middleware over one exchange, returning the replacement.
    #[tracing::instrument(skip_all, fields(middleware = %self.describe()))]
    pub async fn apply(&self, exchange: ExchangeView) -> Result<ExchangeView> {
        let payload = serde_json::to_vec(&exchange).map_err(|e| self.failure(format!("could not serialize pair: {e}")))?;

        let output = match &self.spec {
            MiddlewareSpec::Binary { command, args } => self.run_binary(command, args, &payload).await?,
            MiddlewareSpec::Remote { url } => self.run_remote(url, payload).await?,
        };

        serde_json::from_slice(&output).map_err(|e| self.failure(format!("middleware output is not a valid pair: {e}")))
    }

    async fn run_binary(&self, command: &str, args: &[String], payload: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format!("could not start middleware: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("middleware stdin unavailable".to_string()))?;
        stdin
            .write_all(payload)
            .await
            .map_err(|e| self.failure(format!("could not write to middleware stdin: {e}")))?;
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.failure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failure(format!("could not collect middleware output: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("exit status {}: {}", output.status, stderr.trim())));
        }
        Ok(output.stdout)
    }

    async fn run_remote(&self, url: &Url, payload: Vec<u8>) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/json")
            .body(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.failure(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.failure(format!("could not read response: {e}")))?;

        if !status.is_success() {
            return Err(self.failure(format!("status {status}: {}", String::from_utf8_lossy(&body))));
        }
        Ok(body.to_vec())
    }

    fn failure(&self, cause: String) -> Error {
        Error::Middleware {
            middleware: self.describe(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{ParsedRequest, Scheme};
    use crate::models::response::ResponseDetails;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchange() -> ExchangeView {
        let request = ParsedRequest::new("GET", Scheme::Http, "example.com", "/resource");
        ExchangeView::new(&request, &ResponseDetails::new(200, "original"))
    }

    #[tokio::test]
    async fn remote_middleware_replaces_the_pair() {
        let server = MockServer::start().await;
        let mut replacement = exchange();
        replacement.response.status = 418;
        replacement.response.body = "modified".to_string();

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&replacement))
            .mount(&server)
            .await;

        let middleware = Middleware::new(
            MiddlewareSpec::Remote {
                url: Url::parse(&server.uri()).unwrap(),
            },
            Duration::from_secs(2),
        );

        let out = middleware.apply(exchange()).await.unwrap();
        assert_eq!(out.response.status, 418);
        assert_eq!(out.response.body, "modified");
    }

    #[tokio::test]
    async fn remote_failure_is_a_middleware_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let middleware = Middleware::new(
            MiddlewareSpec::Remote {
                url: Url::parse(&server.uri()).unwrap(),
            },
            Duration::from_secs(2),
        );

        let err = middleware.apply(exchange()).await.unwrap_err();
        match &err {
            Error::Middleware { cause, .. } => assert!(cause.contains("500")),
            other => panic!("expected middleware error, got {other:?}"),
        }
        assert!(err.synthetic_body().contains("error when executing middleware"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_middleware_error() {
        let middleware = Middleware::new(
            MiddlewareSpec::Binary {
                command: "/definitely/not/a/real/middleware".to_string(),
                args: vec![],
            },
            Duration::from_secs(2),
        );

        let err = middleware.apply(exchange()).await.unwrap_err();
        assert!(matches!(err, Error::Middleware { .. }));
    }
}
