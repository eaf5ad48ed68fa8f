// src/resilience/retry.rs
//! Bounded exponential backoff with jitter.
//!
//! Retryability is decided in this order:
//! 1. error kinds that are never retried (configuration, validation, parse,
//!    circuit-open, malformed request) stop immediately;
//! 2. the error text contains a known transient pattern;
//! 3. the HTTP status is in `retryable_status_codes`;
//! 4. the error's own retryable flag.
//!
//! A rate-limit error waits exactly its `retry_after` instead of the backoff.

use metrics::counter;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

pub const DEFAULT_RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

pub const DEFAULT_TRANSIENT_MESSAGES: &[&str] = &[
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "connection reset",
    "connection refused",
    "connection failed",
    "socket hang up",
    "dns",
    "network",
    "timed out",
    "timeout",
    "rate limited",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter in percent of the capped delay (20.0 = ±20%).
    pub jitter_percent: f64,
    pub retryable_status_codes: Vec<u16>,
    /// Lowercase substrings of error text that mark a failure as transient.
    pub transient_messages: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::api_default()
    }
}

/// What the observer sees before each backoff wait.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub error: &'a IngestError,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, jitter_percent: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter_percent: jitter_percent.clamp(0.0, 100.0),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            transient_messages: DEFAULT_TRANSIENT_MESSAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn api_default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), 20.0)
    }

    pub fn scraping_default() -> Self {
        Self::new(5, Duration::from_secs(2), Duration::from_secs(60), 30.0)
    }

    /// `min(base * 2^(attempt-1), max)`, without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff for `attempt` with jitter applied.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped = self.base_backoff(attempt).as_secs_f64();
        if self.jitter_percent <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let spread = self.jitter_percent / 100.0;
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    pub fn is_retryable(&self, err: &IngestError) -> bool {
        if err.is_never_retried() {
            return false;
        }
        let text = err.to_string().to_lowercase();
        if self.transient_messages.iter().any(|m| text.contains(m.as_str())) {
            return true;
        }
        if let Some(status) = err.status() {
            if self.retryable_status_codes.contains(&status) {
                return true;
            }
        }
        err.retryable_flag().unwrap_or(false)
    }

    /// Delay before the attempt after `attempt`.
    fn delay_for(&self, attempt: u32, err: &IngestError) -> Duration {
        err.retry_after().unwrap_or_else(|| self.backoff_delay(attempt))
    }

    /// `with_retry` with the default observer: a `warn` line per retry.
    pub async fn run<F, Fut, T>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(self, op, |a| {
            warn!(
                target: "retry",
                op = label,
                attempt = a.attempt,
                max_retries = a.max_retries,
                delay_ms = a.delay.as_millis() as u64,
                error = %a.error,
                "retrying after failure"
            );
        })
        .await
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are spent. `on_retry` fires before every wait.
pub async fn with_retry<F, Fut, T, O>(policy: &RetryPolicy, mut op: F, mut on_retry: O) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    O: FnMut(&RetryAttempt<'_>),
{
    let mut attempt: u32 = 1;
    loop {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if attempt > policy.max_retries {
            debug!(target: "retry", attempts = attempt, error = %err, "retries exhausted");
            return Err(err);
        }
        if !policy.is_retryable(&err) {
            debug!(target: "retry", error = %err, "not retryable");
            return Err(err);
        }
        let delay = policy.delay_for(attempt, &err);
        on_retry(&RetryAttempt {
            attempt,
            max_retries: policy.max_retries,
            delay,
            error: &err,
        });
        counter!("retry_attempts_total").increment(1);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> IngestError {
        IngestError::Http {
            status,
            message: "upstream".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350), 0.0);
        assert_eq!(p.base_backoff(1), Duration::from_millis(100));
        assert_eq!(p.base_backoff(2), Duration::from_millis(200));
        assert_eq!(p.base_backoff(3), Duration::from_millis(350));
        assert_eq!(p.base_backoff(40), Duration::from_millis(350));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = RetryPolicy::new(3, Duration::from_millis(1_000), Duration::from_secs(30), 20.0);
        for _ in 0..200 {
            let d = p.backoff_delay(1).as_millis();
            assert!((800..=1_200).contains(&d), "delay {d} outside ±20%");
        }
    }

    #[test]
    fn classification_order() {
        let p = RetryPolicy::api_default();
        assert!(p.is_retryable(&http(503)));
        assert!(p.is_retryable(&http(408)));
        assert!(!p.is_retryable(&http(404)));
        assert!(p.is_retryable(&IngestError::Network {
            message: "connection reset by peer".into()
        }));
        assert!(p.is_retryable(&IngestError::Blocked {
            provider: "x".into(),
            block_type: "captcha".into()
        }));
        // Text says timeout, kind says never.
        assert!(!p.is_retryable(&IngestError::validation("phone", "timeout while parsing")));
        assert!(!p.is_retryable(&IngestError::CircuitOpen { name: "x:y".into() }));
        assert!(!p.is_retryable(&IngestError::Storage("disk full".into())));
    }
}
