//! # Rolling Window
//! Sliding time window over call outcomes, used by the circuit breaker.
//!
//! Collects `(timestamp, ok, latency)` samples and answers failure-rate and
//! latency-percentile questions over the last `window`. Not synchronized on
//! its own; the owner keeps it behind its lock.

use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    ok: bool,
    latency: Duration,
}

#[derive(Debug)]
pub struct RollingWindow {
    buf: VecDeque<Sample>,
    window: Duration,
}

impl RollingWindow {
    pub fn with_window(window: Duration) -> Self {
        Self {
            buf: VecDeque::new(),
            window,
        }
    }

    /// Record one outcome at the current time, discarding expired entries.
    pub fn record(&mut self, ok: bool, latency: Duration) {
        let now = Instant::now();
        self.buf.push_back(Sample { at: now, ok, latency });
        self.prune(now);
    }

    /// `(calls, failures)` within the window.
    pub fn counts(&mut self) -> (usize, usize) {
        self.prune(Instant::now());
        let failures = self.buf.iter().filter(|s| !s.ok).count();
        (self.buf.len(), failures)
    }

    /// Failure percentage (0..=100) within the window; 0 when empty.
    pub fn failure_percentage(&mut self) -> f64 {
        match self.counts() {
            (0, _) => 0.0,
            (n, f) => f as f64 * 100.0 / n as f64,
        }
    }

    /// `(mean, p50, p95, p99)` latency in milliseconds over the window.
    pub fn latency_summary_ms(&mut self) -> (f64, f64, f64, f64) {
        self.prune(Instant::now());
        if self.buf.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut ms: Vec<f64> = self
            .buf
            .iter()
            .map(|s| s.latency.as_secs_f64() * 1_000.0)
            .collect();
        ms.sort_by(|a, b| a.total_cmp(b));
        let mean = ms.iter().sum::<f64>() / ms.len() as f64;
        (mean, percentile(&ms, 50.0), percentile(&ms, 95.0), percentile(&ms, 99.0))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.buf.front() {
            if now.saturating_duration_since(front.at) > self.window {
                self.buf.pop_front();
            } else {
                break; // samples are time-ordered
            }
        }
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
