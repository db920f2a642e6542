//! Canonical response model and simulated latency parameters.

use bytes::Bytes;
use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::Headers;

/// A response as stored in the simulation or captured from upstream.
///
/// The body is canonical bytes; `encoded_body` only records that the wire
/// form was base64 so export can round-trip non-UTF-8 payloads. A response
/// with `templated == false` is emitted byte-identical to what was stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseDetails {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub encoded_body: bool,
    pub templated: bool,
    /// State keys this response writes when it is served.
    pub transitions_state: HashMap<String, String>,
    /// State keys this response deletes when it is served.
    pub removes_state: Vec<String>,
    pub fixed_delay: Duration,
    pub log_normal_delay: Option<LogNormalDelay>,
    pub post_action_hooks: Vec<PostActionHook>,
}

impl ResponseDetails {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        ResponseDetails {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Total simulated latency for this response: the fixed delay plus one
    /// sample of the log-normal delay, if configured.
    pub fn sample_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let mut delay = self.fixed_delay;
        if let Some(log_normal) = &self.log_normal_delay {
            delay += log_normal.sample(rng);
        }
        delay
    }
}

/// An external command to run after the response has been emitted.
///
/// Hooks are fire-and-forget: the exchange never waits on them and their
/// exit status is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostActionHook {
    pub binary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// Milliseconds to wait before the hook runs.
    #[serde(default, rename = "delayInMs")]
    pub delay_ms: u64,
}

/// Log-normally distributed latency, parameterized the way operators think
/// about it (all values in milliseconds).
///
/// `median` maps to the distribution's location (μ = ln median) and `mean`
/// fixes the spread (σ² = 2·(ln mean − μ)). Samples are clamped to
/// `[min, max]`; a zero bound disables that side of the clamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNormalDelay {
    #[serde(default)]
    pub min: u64,
    #[serde(default)]
    pub max: u64,
    #[serde(default)]
    pub mean: u64,
    #[serde(default)]
    pub median: u64,
}

impl LogNormalDelay {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.median == 0 || self.mean == 0 {
            return Duration::ZERO;
        }
        let mu = (self.median as f64).ln();
        let variance = 2.0 * ((self.mean as f64).ln() - mu);
        let sigma = if variance > 0.0 { variance.sqrt() } else { 0.0 };

        let millis = match LogNormal::new(mu, sigma) {
            Ok(dist) => dist.sample(rng),
            Err(_) => self.median as f64,
        };

        let mut millis = millis.max(0.0) as u64;
        if self.min > 0 {
            millis = millis.max(self.min);
        }
        if self.max > 0 {
            millis = millis.min(self.max);
        }
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn log_normal_samples_stay_within_bounds() {
        let delay = LogNormalDelay {
            min: 10,
            max: 100,
            mean: 40,
            median: 30,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let sampled = delay.sample(&mut rng);
            assert!(sampled >= Duration::from_millis(10));
            assert!(sampled <= Duration::from_millis(100));
        }
    }

    #[test]
    fn zero_parameters_mean_no_delay() {
        let delay = LogNormalDelay::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(delay.sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn total_delay_adds_fixed_and_distributed() {
        let mut response = ResponseDetails::new(200, "ok");
        response.fixed_delay = Duration::from_millis(50);
        response.log_normal_delay = Some(LogNormalDelay {
            min: 10,
            max: 10,
            mean: 10,
            median: 10,
        });
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(response.sample_delay(&mut rng), Duration::from_millis(60));
    }
}
