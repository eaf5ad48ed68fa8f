// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IngestError;
use crate::http::ProxyPoolConfig;
use crate::model::LeadSource;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
pub const ENV_GOOGLE_PLACES_API_KEY: &str = "GOOGLE_PLACES_API_KEY";
pub const ENV_YELP_API_KEY: &str = "YELP_API_KEY";
pub const ENV_PROXY_LIST_PATH: &str = "PROXY_LIST_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub request_timeout_ms: u64,
    /// 1 = sources run one after another.
    pub max_concurrent_sources: usize,
    pub proxy: ProxySettings,
    /// Keyed by `LeadSource::config_key()`.
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        for s in [LeadSource::GoogleMaps, LeadSource::Yelp] {
            sources.insert(s.config_key().to_string(), SourceConfig::default_for(s));
        }
        Self {
            request_timeout_ms: 30_000,
            max_concurrent_sources: 1,
            proxy: ProxySettings::default(),
            sources,
        }
    }
}

impl IngestConfig {
    /// Settings for `source`, falling back to its built-in defaults.
    pub fn source(&self, source: LeadSource) -> SourceConfig {
        self.sources
            .get(source.config_key())
            .cloned()
            .unwrap_or_else(|| SourceConfig::default_for(source))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub cooldown_ms: u64,
    pub max_fail_rate: f64,
    pub auto_remove: bool,
    pub min_samples: u32,
    pub urls: Vec<String>,
    /// One proxy URL per line. `PROXY_LIST_PATH` overrides this.
    pub list_path: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        let d = ProxyPoolConfig::default();
        Self {
            cooldown_ms: d.cooldown.as_millis() as u64,
            max_fail_rate: d.max_fail_rate,
            auto_remove: d.auto_remove,
            min_samples: d.min_samples,
            urls: Vec::new(),
            list_path: None,
        }
    }
}

impl ProxySettings {
    pub fn pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            cooldown: Duration::from_millis(self.cooldown_ms),
            max_fail_rate: self.max_fail_rate,
            auto_remove: self.auto_remove,
            min_samples: self.min_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    /// Use the scraping client (proxy egress, rotated identity).
    pub proxy_required: bool,
    /// Page ceiling per search term.
    pub max_pages: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::api(10)
    }
}

impl SourceConfig {
    fn api(requests_per_sec: u32) -> Self {
        Self {
            enabled: true,
            rate_limit: RateLimitSettings {
                max_requests: requests_per_sec,
                window_ms: 1_000,
            },
            circuit_breaker: CircuitBreakerSettings::from(&CircuitBreakerConfig::api_default()),
            retry: RetrySettings::from(&RetryPolicy::api_default()),
            proxy_required: false,
            max_pages: 3,
        }
    }

    fn scraping() -> Self {
        Self {
            enabled: false,
            rate_limit: RateLimitSettings {
                max_requests: 1,
                window_ms: 2_000,
            },
            circuit_breaker: CircuitBreakerSettings::from(&CircuitBreakerConfig::scraping_default()),
            retry: RetrySettings::from(&RetryPolicy::scraping_default()),
            proxy_required: true,
            max_pages: 3,
        }
    }

    pub fn default_for(source: LeadSource) -> Self {
        match source {
            LeadSource::GoogleMaps => Self::api(10),
            LeadSource::Yelp => Self {
                // offset ceiling 1000 at 50 per page
                max_pages: 20,
                ..Self::api(5)
            },
            _ => Self::scraping(),
        }
    }

    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        let c = &self.circuit_breaker;
        CircuitBreakerConfig {
            timeout: Duration::from_millis(c.timeout_ms),
            error_threshold_percentage: c.error_threshold_percentage,
            reset_timeout: Duration::from_millis(c.reset_timeout_ms),
            volume_threshold: c.volume_threshold,
            rolling_window: Duration::from_millis(c.rolling_window_ms),
            half_open_probes: c.half_open_probes,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        RetryPolicy::new(
            r.max_retries,
            Duration::from_millis(r.base_delay_ms),
            Duration::from_millis(r.max_delay_ms),
            r.jitter_percent,
        )
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit.window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub timeout_ms: u64,
    pub error_threshold_percentage: f64,
    pub reset_timeout_ms: u64,
    pub volume_threshold: u32,
    pub rolling_window_ms: u64,
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::api_default())
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerSettings {
    fn from(c: &CircuitBreakerConfig) -> Self {
        Self {
            timeout_ms: c.timeout.as_millis() as u64,
            error_threshold_percentage: c.error_threshold_percentage,
            reset_timeout_ms: c.reset_timeout.as_millis() as u64,
            volume_threshold: c.volume_threshold,
            rolling_window_ms: c.rolling_window.as_millis() as u64,
            half_open_probes: c.half_open_probes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_percent: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::api_default())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(p: &RetryPolicy) -> Self {
        Self {
            max_retries: p.max_retries,
            base_delay_ms: p.base_delay.as_millis() as u64,
            max_delay_ms: p.max_delay.as_millis() as u64,
            jitter_percent: p.jitter_percent,
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing ingest config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) config/ingest.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/ingest.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/ingest.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(IngestConfig::default())
}

/// Parse a (possibly partial) config document. Keys that are present replace
/// the built-in defaults; everything else, including nested per-source
/// tables, keeps its default.
pub fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    let overrides: Value = if hint_ext == "json" {
        serde_json::from_str(s)?
    } else if hint_ext == "toml" {
        toml::from_str(s)?
    } else {
        match serde_json::from_str(s) {
            Ok(v) => v,
            Err(_) => toml::from_str(s)?,
        }
    };
    let mut merged = serde_json::to_value(IngestConfig::default())?;
    merge_values(&mut merged, overrides);
    Ok(serde_json::from_value(merged)?)
}

fn merge_values(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge_values(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Provider credentials, read from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub google_places_api_key: Option<String>,
    pub yelp_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("google_places_api_key", &self.google_places_api_key.as_ref().map(|_| "***"))
            .field("yelp_api_key", &self.yelp_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |k: &str| {
            std::env::var(k)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            google_places_api_key: read(ENV_GOOGLE_PLACES_API_KEY),
            yelp_api_key: read(ENV_YELP_API_KEY),
        }
    }

    /// Key for a keyed provider, or a configuration error naming the variable.
    pub fn require(&self, source: LeadSource) -> crate::error::Result<&str> {
        let (key, env) = match source {
            LeadSource::GoogleMaps => (&self.google_places_api_key, ENV_GOOGLE_PLACES_API_KEY),
            LeadSource::Yelp => (&self.yelp_api_key, ENV_YELP_API_KEY),
            other => {
                return Err(IngestError::configuration(
                    other.config_key(),
                    format!("{other} has no credential"),
                ))
            }
        };
        key.as_deref()
            .ok_or_else(|| IngestError::configuration(env, format!("{env} is not set")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_source_table_keeps_per_source_defaults() {
        let toml = r#"
            max_concurrent_sources = 2
            [sources.yelp.retry]
            max_retries = 1
        "#;
        let cfg = parse_config(toml, "toml").unwrap();
        assert_eq!(cfg.max_concurrent_sources, 2);
        let yelp = cfg.source(LeadSource::Yelp);
        assert_eq!(yelp.retry.max_retries, 1);
        assert_eq!(yelp.retry.base_delay_ms, 1_000);
        // Yelp's own rate limit survives the partial override.
        assert_eq!(yelp.rate_limit.max_requests, 5);
        assert_eq!(cfg.source(LeadSource::GoogleMaps).rate_limit.max_requests, 10);
    }

    #[test]
    fn json_is_accepted_without_hint() {
        let json = r#"{"request_timeout_ms": 5000, "proxy": {"urls": ["http://p:1"]}}"#;
        let cfg = parse_config(json, "").unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.proxy.urls, vec!["http://p:1".to_string()]);
        assert!(cfg.proxy.auto_remove);
    }

    #[test]
    fn unknown_sources_get_scraping_defaults() {
        let cfg = IngestConfig::default();
        let angi = cfg.source(LeadSource::Angi);
        assert!(angi.proxy_required);
        assert_eq!(angi.retry.max_retries, 5);
        assert_eq!(angi.circuit_breaker.volume_threshold, 3);
    }

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let c = Credentials::default();
        let err = c.require(LeadSource::Yelp).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("YELP_API_KEY"));
        let c = Credentials {
            yelp_api_key: Some("k".into()),
            ..Credentials::default()
        };
        assert_eq!(c.require(LeadSource::Yelp).unwrap(), "k");
        assert!(!format!("{c:?}").contains("\"k\""));
    }
}
