//! Retry anchor: re-drives the rest of the chain on transient failure.
//!
//! Backoff is exponential with full jitter:
//! `delay = uniform(0, min(max_delay, base_delay * 2^n))` for the n-th retry.
//! For 429/503 a `Retry-After` family header replaces the computed delay,
//! bounded by the same `max_delay`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::policy::{next_send, Policy};

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Millisecond-precision overrides, checked before `Retry-After`.
const RETRY_AFTER_MS_HEADERS: [&str; 2] = ["retry-after-ms", "x-ms-retry-after-ms"];

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base delay `d0`.
    #[serde(default = "default_base_delay", with = "duration_ms")]
    pub base_delay: Duration,

    /// Upper bound for a computed or server-requested delay.
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,

    /// Response statuses treated as transient.
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> Duration {
    Duration::from_millis(800)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_status_codes() -> Vec<u16> {
    DEFAULT_RETRY_STATUS_CODES.to_vec()
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            status_codes: default_status_codes(),
        }
    }
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    /// Upper bound of the jitter window for the `retry`-th retry (0-based).
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full-jitter delay for the `retry`-th retry (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_millis() as u64;
        let jittered_ms = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(jittered_ms)
    }

    fn is_retryable_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Server-requested delay from a 429/503 response, if any.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in RETRY_AFTER_MS_HEADERS {
        if let Some(ms) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // HTTP-date form
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// The retry anchor policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            // A cancelled call is never retried.
            ctx.check()?;

            let outcome = next_send(&ctx.with_attempt(attempt), request, next).await;

            // Some(server_delay) when the outcome is transient.
            let transient = match &outcome {
                Ok(response) if self.options.is_retryable_status(response.status().as_u16()) => {
                    Some(match response.status().as_u16() {
                        429 | 503 => retry_after(response.headers()),
                        _ => None,
                    })
                }
                Ok(_) => None,
                Err(e) if e.is_retryable() => Some(None),
                Err(_) => None,
            };
            let Some(server_delay) = transient else {
                return outcome;
            };

            attempt += 1;
            if attempt >= max_attempts {
                warn!(
                    attempts = attempt,
                    max_attempts = max_attempts,
                    "retries exhausted, surfacing last outcome"
                );
                return outcome;
            }

            if !request.body().is_replayable() {
                warn!("request body is a single-read stream, not retrying");
                return outcome;
            }

            let delay = match server_delay {
                Some(requested) => requested.min(self.options.max_delay),
                None => self.options.backoff(attempt - 1),
            };

            if let Some(remaining) = ctx.remaining() {
                if delay >= remaining {
                    debug!(
                        backoff_ms = delay.as_millis() as u64,
                        remaining_ms = remaining.as_millis() as u64,
                        "next retry would pass the deadline, surfacing last outcome"
                    );
                    return outcome;
                }
            }

            match &outcome {
                Ok(response) => warn!(
                    status = response.status().as_u16(),
                    retry = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    server_requested = server_delay.is_some(),
                    "retrying request"
                ),
                Err(e) => warn!(
                    error = %e,
                    retry = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    "retrying request"
                ),
            }

            ctx.sleep(delay).await?;
        }
    }
}
