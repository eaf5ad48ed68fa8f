// src/registry.rs
//! Process-wide resilience state, built once at startup and passed by
//! reference to integrations and the coordinator.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::http::proxy_pool::load_proxy_list;
use crate::http::{ProxyPool, RateLimiterRegistry, TokenBucket};
use crate::ingest::config::{IngestConfig, SourceConfig, ENV_PROXY_LIST_PATH};
use crate::model::LeadSource;
use crate::resilience::CircuitBreakerRegistry;

#[derive(Debug)]
pub struct ResilienceRegistry {
    limiters: RateLimiterRegistry,
    breakers: CircuitBreakerRegistry,
    proxies: Arc<ProxyPool>,
    write_gate: AsyncMutex<()>,
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(ProxyPool::empty())
    }
}

impl ResilienceRegistry {
    pub fn new(proxies: ProxyPool) -> Self {
        Self {
            limiters: RateLimiterRegistry::new(),
            breakers: CircuitBreakerRegistry::new(),
            proxies: Arc::new(proxies),
            write_gate: AsyncMutex::new(()),
        }
    }

    /// Builds the proxy pool from `proxy.urls` plus the list file
    /// (`$PROXY_LIST_PATH`, else `proxy.list_path`).
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let pool = ProxyPool::with_proxies(config.proxy.pool_config(), config.proxy.urls.iter().cloned());
        let list_path = std::env::var(ENV_PROXY_LIST_PATH)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| config.proxy.list_path.clone());
        if let Some(p) = list_path {
            pool.add_proxies(load_proxy_list(&PathBuf::from(p))?);
        }
        info!(target: "ingest", proxies = pool.len(), "resilience registry ready");
        Ok(Self::new(pool))
    }

    /// The limiter for `source`, created from its settings on first use.
    pub fn limiter_for(&self, source: LeadSource, cfg: &SourceConfig) -> Arc<TokenBucket> {
        self.limiters
            .get_or_create(source.config_key(), cfg.rate_limit.max_requests, cfg.rate_window())
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    /// Serializes duplicate-check + create across concurrent ingestion work.
    pub fn write_gate(&self) -> &AsyncMutex<()> {
        &self.write_gate
    }
}
