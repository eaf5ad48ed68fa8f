// src/http/rate_limiter.rs
//! Token bucket rate limiter.
//!
//! Bursts up to `capacity`, then throttles to `refill_per_sec`. Tokens are
//! refilled lazily on each access from the elapsed time; there is no
//! background timer. Refill and debit happen under one lock so concurrent
//! `acquire` calls never overdraw the bucket.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Upper bound on a single wait slice, so long waits re-check the bucket.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket. A non-positive refill rate is bumped to a tiny positive one.
    pub fn new(name: impl Into<String>, capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: refill_per_sec.max(f64::EPSILON),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// `max_requests` per `window`, converted to a per-second refill rate.
    pub fn per_window(name: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64().max(0.001);
        Self::new(name, max_requests, f64::from(max_requests) / secs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Wait until `n` tokens are available, then debit them.
    pub async fn acquire(&self, n: u32) -> Result<()> {
        let need = self.check_request(n)?;
        loop {
            let wait = {
                let mut st = self.state.lock();
                self.refill(&mut st);
                if st.tokens >= need {
                    st.tokens -= need;
                    debug!(
                        target: "rate_limiter",
                        limiter = %self.name,
                        acquired = n,
                        remaining = st.tokens,
                        "tokens acquired"
                    );
                    return Ok(());
                }
                Duration::from_secs_f64((need - st.tokens) / self.refill_per_sec)
            };
            let slice = wait.min(MAX_WAIT_SLICE);
            debug!(
                target: "rate_limiter",
                limiter = %self.name,
                wait_ms = slice.as_millis() as u64,
                need = n,
                "waiting for tokens"
            );
            tokio::time::sleep(slice).await;
        }
    }

    /// Debit `n` tokens if available right now. Never suspends.
    pub fn try_acquire(&self, n: u32) -> bool {
        let Ok(need) = self.check_request(n) else {
            return false;
        };
        let mut st = self.state.lock();
        self.refill(&mut st);
        if st.tokens >= need {
            st.tokens -= need;
            true
        } else {
            false
        }
    }

    /// Current token count (after refill).
    pub fn tokens(&self) -> f64 {
        let mut st = self.state.lock();
        self.refill(&mut st);
        st.tokens
    }

    /// How long until `n` tokens would be available.
    pub fn wait_time(&self, n: u32) -> Duration {
        let mut st = self.state.lock();
        self.refill(&mut st);
        let need = f64::from(n);
        if st.tokens >= need {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((need - st.tokens) / self.refill_per_sec)
        }
    }

    fn check_request(&self, n: u32) -> Result<f64> {
        let need = f64::from(n);
        if need > self.capacity {
            return Err(IngestError::InvalidRequest(format!(
                "limiter {} cannot grant {n} tokens (capacity {})",
                self.name, self.capacity
            )));
        }
        Ok(need)
    }

    fn refill(&self, st: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(st.last_refill).as_secs_f64();
        st.tokens = (st.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        st.last_refill = now;
    }
}

/// One limiter per upstream source, created on first request and reused for
/// the lifetime of the registry.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing limiter for `name`, or a new one built from the window settings.
    /// Settings passed on later calls are ignored.
    pub fn get_or_create(&self, name: &str, max_requests: u32, window: Duration) -> Arc<TokenBucket> {
        let mut map = self.limiters.lock();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::per_window(name, max_requests, window)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TokenBucket>> {
        self.limiters.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.limiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let b = TokenBucket::new("t", 3, 1.0);
        assert!(b.try_acquire(1));
        assert!(b.try_acquire(2));
        assert!(!b.try_acquire(1));
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(b.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let b = TokenBucket::new("t", 2, 10.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((b.tokens() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let b = TokenBucket::new("t", 2, 1.0);
        assert!(b.acquire(3).await.is_err());
        assert!(!b.try_acquire(3));
    }

    #[test]
    fn registry_reuses_instances() {
        let reg = RateLimiterRegistry::new();
        let a = reg.get_or_create("yelp", 5, Duration::from_secs(1));
        let b = reg.get_or_create("yelp", 50, Duration::from_secs(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert!((a.refill_per_sec() - 5.0).abs() < 1e-9);
    }
}
