// src/http/client.rs
//! Outbound request facade: rate limit, optional proxy egress, identity
//! rotation, response classification.

use metrics::counter;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::http::proxy_pool::ProxyPool;
use crate::http::rate_limiter::TokenBucket;

/// Backoff used when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const MAX_ERROR_BODY_CHARS: usize = 200;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

fn random_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Keyed official API: rate-limited, direct egress, fixed identity.
    Api,
    /// No official API: rate-limited, proxied, rotated identity.
    Scraping,
}

/// A request description that can be replayed on every retry attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

pub struct ResilientClient {
    provider: String,
    mode: ClientMode,
    limiter: Arc<TokenBucket>,
    proxies: Option<Arc<ProxyPool>>,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
    timeout: Duration,
}

impl ResilientClient {
    pub fn api(provider: impl Into<String>, limiter: Arc<TokenBucket>, timeout: Duration) -> Result<Self> {
        Self::build(provider.into(), ClientMode::Api, limiter, None, timeout)
    }

    pub fn scraping(
        provider: impl Into<String>,
        limiter: Arc<TokenBucket>,
        proxies: Arc<ProxyPool>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::build(provider.into(), ClientMode::Scraping, limiter, Some(proxies), timeout)
    }

    fn build(
        provider: String,
        mode: ClientMode,
        limiter: Arc<TokenBucket>,
        proxies: Option<Arc<ProxyPool>>,
        timeout: Duration,
    ) -> Result<Self> {
        let direct = base_builder(mode, timeout)
            .build()
            .map_err(|e| IngestError::configuration("http_client", e.to_string()))?;
        Ok(Self {
            provider,
            mode,
            limiter,
            proxies,
            direct,
            proxied: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    /// Execute one attempt. Retries and circuit breaking wrap this call.
    pub async fn send(&self, req: OutboundRequest) -> Result<HttpResponse> {
        self.limiter.acquire(1).await?;

        let proxy = match (&self.proxies, self.mode) {
            (Some(pool), ClientMode::Scraping) if pool.has_proxies() => pool.next(),
            _ => None,
        };
        let client = match &proxy {
            Some(p) => self.client_for_proxy(&p.url)?,
            None => self.direct.clone(),
        };

        let mut builder = client.request(req.method.clone(), &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.json {
            builder = builder.json(body);
        }
        if self.mode == ClientMode::Scraping {
            builder = builder.header(USER_AGENT, random_user_agent());
        }

        debug!(
            target: "http_client",
            provider = %self.provider,
            method = %req.method,
            url = %req.url,
            proxy = proxy.as_ref().map(|p| p.url.as_str()).unwrap_or("-"),
            "outbound request"
        );
        counter!("http_requests_total", "source" => self.provider.clone()).increment(1);

        let outcome = self.execute(builder).await;

        if let (Some(pool), Some(p)) = (&self.proxies, &proxy) {
            match &outcome {
                Ok(_) => pool.mark_success(&p.url),
                Err(_) => pool.mark_failure(&p.url),
            }
        }
        if matches!(outcome, Err(IngestError::RateLimited { .. })) {
            counter!("http_rate_limited_total", "source" => self.provider.clone()).increment(1);
        }
        outcome
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await?;
        classify_response(&self.provider, self.mode, status, retry_after.as_deref(), body)
    }

    fn client_for_proxy(&self, url: &str) -> Result<reqwest::Client> {
        let mut cache = self.proxied.lock();
        if let Some(c) = cache.get(url) {
            return Ok(c.clone());
        }
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| IngestError::configuration("proxy", format!("{url}: {e}")))?;
        let client = base_builder(self.mode, self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| IngestError::configuration("proxy", format!("{url}: {e}")))?;
        cache.insert(url.to_string(), client.clone());
        Ok(client)
    }
}

fn base_builder(mode: ClientMode, timeout: Duration) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/html, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    // Egress is chosen by the pool only, never by proxy env vars.
    let builder = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .no_proxy();
    match mode {
        ClientMode::Api => builder.user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        )),
        ClientMode::Scraping => builder,
    }
}

/// Map an upstream response to success or a typed error.
///
/// - 2xx: success, unless a scraping response body is a captcha page.
/// - 429: `RateLimited`, honoring `Retry-After` seconds (default 60s).
/// - 401/403 in API mode: `Configuration` (bad or revoked key).
/// - 403 in scraping mode: `Blocked`.
/// - anything else: `Http`.
pub fn classify_response(
    provider: &str,
    mode: ClientMode,
    status: u16,
    retry_after: Option<&str>,
    body: String,
) -> Result<HttpResponse> {
    if (200..300).contains(&status) {
        if mode == ClientMode::Scraping && looks_like_captcha(&body) {
            return Err(IngestError::Blocked {
                provider: provider.to_string(),
                block_type: "captcha".into(),
            });
        }
        return Ok(HttpResponse { status, body });
    }

    match (status, mode) {
        (429, _) => {
            let retry_after = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Err(IngestError::RateLimited {
                provider: provider.to_string(),
                retry_after,
            })
        }
        (401 | 403, ClientMode::Api) => Err(IngestError::configuration(
            provider,
            format!("credentials rejected (status {status}): {}", snippet(&body)),
        )),
        (403, ClientMode::Scraping) => Err(IngestError::Blocked {
            provider: provider.to_string(),
            block_type: "forbidden".into(),
        }),
        _ => Err(IngestError::Http {
            status,
            message: snippet(&body),
        }),
    }
}

fn looks_like_captcha(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("captcha") || lower.contains("unusual traffic")
}

fn snippet(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>().trim().to_string()
}
