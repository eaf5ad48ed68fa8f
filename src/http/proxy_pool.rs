// src/http/proxy_pool.rs
//! Egress proxy rotation with per-proxy health tracking.
//!
//! - `next()` picks round-robin among proxies not in cooldown.
//! - Every hand-out starts a cooldown for that proxy, whatever the outcome.
//! - With `auto_remove`, a proxy whose failure rate exceeds `max_fail_rate`
//!   (after `min_samples` outcomes) is dropped from the pool for good.

use anyhow::{Context, Result};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    fn detect(url: &str) -> Self {
        let lower = url.trim().to_ascii_lowercase();
        if lower.starts_with("socks5://") || lower.starts_with("socks5h://") {
            ProxyProtocol::Socks5
        } else if lower.starts_with("https://") {
            ProxyProtocol::Https
        } else {
            ProxyProtocol::Http
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub url: String,
    pub protocol: ProxyProtocol,
    pub last_used_at: Option<Instant>,
    pub fail_count: u32,
    pub success_count: u32,
}

impl Proxy {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            protocol: ProxyProtocol::detect(&url),
            url,
            last_used_at: None,
            fail_count: 0,
            success_count: 0,
        }
    }

    pub fn samples(&self) -> u32 {
        self.fail_count + self.success_count
    }

    pub fn fail_rate(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => f64::from(self.fail_count) / f64::from(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPoolConfig {
    /// Minimum time between two hand-outs of the same proxy.
    pub cooldown: Duration,
    /// Failure rate (0..1) above which a proxy is removed.
    pub max_fail_rate: f64,
    pub auto_remove: bool,
    /// Outcomes required before the failure rate is evaluated.
    pub min_samples: u32,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(1_000),
            max_fail_rate: 0.5,
            auto_remove: true,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
}

/// Failure rate under which a proxy counts as healthy in `stats()`.
const HEALTHY_FAIL_RATE: f64 = 0.3;

#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    proxies: Vec<Proxy>,
    cursor: usize,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// A pool with no proxies; callers skip proxying entirely.
    pub fn empty() -> Self {
        Self::new(ProxyPoolConfig::default())
    }

    pub fn with_proxies<I, S>(config: ProxyPoolConfig, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = Self::new(config);
        pool.add_proxies(urls);
        pool
    }

    /// Add proxies by URL; blanks and duplicates are skipped.
    pub fn add_proxies<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        for url in urls {
            let url: String = url.into();
            let url = url.trim().to_string();
            if url.is_empty() || inner.proxies.iter().any(|p| p.url == url) {
                continue;
            }
            inner.proxies.push(Proxy::new(url));
        }
    }

    /// Next proxy not in cooldown, round-robin. `None` if all are cooling down
    /// or the pool is empty.
    pub fn next(&self) -> Option<Proxy> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let n = inner.proxies.len();
        for i in 0..n {
            let idx = (inner.cursor + i) % n;
            let ready = match inner.proxies[idx].last_used_at {
                None => true,
                Some(t) => now.saturating_duration_since(t) >= self.config.cooldown,
            };
            if ready {
                inner.proxies[idx].last_used_at = Some(now);
                inner.cursor = (idx + 1) % n;
                let picked = inner.proxies[idx].clone();
                debug!(target: "proxy_pool", proxy = %picked.url, "proxy selected");
                return Some(picked);
            }
        }
        None
    }

    pub fn mark_success(&self, url: &str) {
        let mut inner = self.inner.lock();
        if let Some(p) = inner.proxies.iter_mut().find(|p| p.url == url) {
            p.success_count += 1;
        }
    }

    pub fn mark_failure(&self, url: &str) {
        let mut inner = self.inner.lock();
        let Some(idx) = inner.proxies.iter().position(|p| p.url == url) else {
            return;
        };
        inner.proxies[idx].fail_count += 1;

        let p = &inner.proxies[idx];
        if self.config.auto_remove
            && p.samples() >= self.config.min_samples
            && p.fail_rate() > self.config.max_fail_rate
        {
            warn!(
                target: "proxy_pool",
                proxy = %p.url,
                fail_rate = p.fail_rate(),
                samples = p.samples(),
                "removing unhealthy proxy"
            );
            inner.proxies.remove(idx);
            if idx < inner.cursor {
                inner.cursor -= 1;
            }
            if inner.cursor >= inner.proxies.len() {
                inner.cursor = 0;
            }
            counter!("proxy_removed_total").increment(1);
        }
    }

    pub fn has_proxies(&self) -> bool {
        !self.inner.lock().proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a proxy's counters.
    pub fn get(&self, url: &str) -> Option<Proxy> {
        self.inner.lock().proxies.iter().find(|p| p.url == url).cloned()
    }

    pub fn stats(&self) -> ProxyStats {
        let inner = self.inner.lock();
        let healthy = inner
            .proxies
            .iter()
            .filter(|p| p.fail_rate() < HEALTHY_FAIL_RATE)
            .count();
        ProxyStats {
            total: inner.proxies.len(),
            healthy,
            degraded: inner.proxies.len() - healthy,
        }
    }
}

/// Read a proxy list file: one URL per line, `#` starts a comment.
pub fn load_proxy_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading proxy list from {}", path.display()))?;
    Ok(content
        .lines()
        .map(|l| l.split('#').next().unwrap_or_default().trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
