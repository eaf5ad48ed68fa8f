// src/resilience/circuit_breaker.rs
//! Per (source, operation) circuit breaker.
//!
//! - CLOSED: calls pass. Once the rolling window holds at least
//!   `volume_threshold` calls and the failure percentage reaches
//!   `error_threshold_percentage`, the circuit opens.
//! - OPEN: calls are rejected without running. After `reset_timeout` the next
//!   state read moves to HALF_OPEN.
//! - HALF_OPEN: up to `half_open_probes` calls run. A success closes the
//!   circuit, a failure reopens it and restarts the reset timer.
//!
//! Every admitted call runs under `timeout`; an elapsed timeout is a failure.
//! Rejections are not failures.

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::resilience::rolling::RollingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub timeout: Duration,
    pub error_threshold_percentage: f64,
    pub reset_timeout: Duration,
    pub volume_threshold: u32,
    pub rolling_window: Duration,
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::api_default()
    }
}

impl CircuitBreakerConfig {
    pub fn api_default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(60),
            volume_threshold: 5,
            rolling_window: Duration::from_secs(60),
            half_open_probes: 1,
        }
    }

    pub fn scraping_default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            error_threshold_percentage: 30.0,
            reset_timeout: Duration::from_secs(120),
            volume_threshold: 3,
            rolling_window: Duration::from_secs(120),
            half_open_probes: 1,
        }
    }
}

/// Snapshot for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub rejects: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub window_calls: usize,
    pub window_failures: usize,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    last_transition_at: Instant,
    window: RollingWindow,
    probes_in_flight: u32,
    successes: u64,
    failures: u64,
    rejects: u64,
    timeouts: u64,
    fallbacks: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Releases a half-open probe slot even if the guarded future is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.inner.lock();
        inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::with_window(config.rolling_window);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                last_transition_at: Instant::now(),
                window,
                probes_in_flight: 0,
                successes: 0,
                failures: 0,
                rejects: 0,
                timeouts: 0,
                fallbacks: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state; an expired OPEN reads as HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `op` through the breaker.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _probe = self.admit()?;
        let started = Instant::now();

        match tokio::time::timeout(self.config.timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success(started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(started.elapsed(), false);
                Err(err)
            }
            Err(_) => {
                warn!(
                    target: "circuit_breaker",
                    breaker = %self.name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "call timed out"
                );
                self.on_failure(started.elapsed(), true);
                Err(IngestError::Timeout {
                    operation: self.name.clone(),
                    after: self.config.timeout,
                })
            }
        }
    }

    /// Like `call`, but any error (including a rejection) is handed to
    /// `fallback`, whose result is returned instead.
    pub async fn call_with_fallback<F, Fut, T, FB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce(IngestError) -> Result<T>,
    {
        match self.call(op).await {
            Ok(v) => Ok(v),
            Err(err) => {
                self.inner.lock().fallbacks += 1;
                debug!(target: "circuit_breaker", breaker = %self.name, error = %err, "fallback used");
                fallback(err)
            }
        }
    }

    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let (window_calls, window_failures) = inner.window.counts();
        let (mean, p50, p95, p99) = inner.window.latency_summary_ms();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            successes: inner.successes,
            failures: inner.failures,
            rejects: inner.rejects,
            timeouts: inner.timeouts,
            fallbacks: inner.fallbacks,
            window_calls,
            window_failures,
            latency_mean_ms: mean,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
        }
    }

    /// Time of the last state transition.
    pub fn last_transition_at(&self) -> Instant {
        self.inner.lock().last_transition_at
    }

    fn admit(&self) -> Result<Option<ProbeSlot<'_>>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let admitted = match inner.state {
            CircuitState::Closed => return Ok(None),
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.probes_in_flight < self.config.half_open_probes.max(1),
        };
        if !admitted {
            inner.rejects += 1;
            drop(inner);
            debug!(target: "circuit_breaker", breaker = %self.name, "call rejected, circuit open");
            counter!("circuit_rejections_total", "breaker" => self.name.clone()).increment(1);
            return Err(IngestError::CircuitOpen {
                name: self.name.clone(),
            });
        }
        inner.probes_in_flight += 1;
        Ok(Some(ProbeSlot { breaker: self }))
    }

    fn on_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.successes += 1;
        inner.window.record(true, latency);
        if inner.state == CircuitState::HalfOpen {
            inner.window.clear();
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self, latency: Duration, timed_out: bool) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        if timed_out {
            inner.timeouts += 1;
        }
        inner.window.record(false, latency);
        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Closed => {
                let (calls, _) = inner.window.counts();
                let pct = inner.window.failure_percentage();
                if calls >= self.config.volume_threshold as usize
                    && pct >= self.config.error_threshold_percentage
                {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // A call admitted before the circuit opened; the timer keeps running.
            CircuitState::Open => {}
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let expired = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if expired {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        let now = Instant::now();
        inner.state = to;
        inner.last_transition_at = now;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(now);
                warn!(
                    target: "circuit_breaker",
                    breaker = %self.name,
                    from = ?from,
                    reset_ms = self.config.reset_timeout.as_millis() as u64,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.probes_in_flight = 0;
                info!(target: "circuit_breaker", breaker = %self.name, "circuit half-open, probing");
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                info!(target: "circuit_breaker", breaker = %self.name, "circuit closed");
            }
        }
    }
}

/// Breakers keyed `"<source>:<operation>"`, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        source: &str,
        operation: &str,
        config: &CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = format!("{source}:{operation}");
        self.breakers
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config.clone())))
            .clone()
    }

    pub fn get(&self, source: &str, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(&format!("{source}:{operation}")).cloned()
    }

    /// Stats for every breaker, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut stats: Vec<CircuitStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
