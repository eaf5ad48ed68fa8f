// tests/http_stack.rs
// Outbound path against a local canned HTTP server: limiter, proxy health,
// retry and breaker wired the way integrations use them.
use lead_ingest::error::IngestError;
use lead_ingest::http::{OutboundRequest, ProxyPool, ProxyPoolConfig, ResilientClient, TokenBucket};
use lead_ingest::ingest::config::{CircuitBreakerSettings, RateLimitSettings, RetrySettings, SourceConfig};
use lead_ingest::ingest::providers::SourceToolkit;
use lead_ingest::model::LeadSource;
use lead_ingest::registry::ResilienceRegistry;
use lead_ingest::resilience::CircuitState;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves `responses` in order (the last one repeats) and records the head
/// of every request it received.
struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    async fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                seen.lock().push(String::from_utf8_lossy(&buf).to_string());
                let resp = &responses[served.min(responses.len() - 1)];
                served += 1;
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        Self { addr, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn hits(&self) -> usize {
        self.requests.lock().len()
    }
}

fn response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn ok() -> String {
    response("200 OK", "", r#"{"ok":true}"#)
}

fn unavailable() -> String {
    response("503 Service Unavailable", "", "down")
}

fn source_config(max_retries: u32, volume_threshold: u32) -> SourceConfig {
    SourceConfig {
        enabled: true,
        rate_limit: RateLimitSettings {
            max_requests: 50,
            window_ms: 60_000,
        },
        circuit_breaker: CircuitBreakerSettings {
            timeout_ms: 5_000,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 60_000,
            volume_threshold,
            rolling_window_ms: 60_000,
            half_open_probes: 1,
        },
        retry: RetrySettings {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter_percent: 0.0,
        },
        proxy_required: false,
        max_pages: 1,
    }
}

fn toolkit(cfg: SourceConfig) -> (SourceToolkit, Arc<ResilienceRegistry>) {
    let registry = Arc::new(ResilienceRegistry::default());
    let kit = SourceToolkit::new(LeadSource::Yelp, cfg, Duration::from_secs(5), registry.clone()).unwrap();
    (kit, registry)
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let server = CannedServer::start(vec![unavailable(), unavailable(), ok()]).await;
    let (kit, registry) = toolkit(source_config(3, 10));

    let resp = kit.execute("search", OutboundRequest::get(server.url("/search"))).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(server.hits(), 3);

    let stats = registry.breakers().get("yelp", "search").unwrap().stats();
    assert_eq!((stats.successes, stats.failures), (1, 2));
    assert_eq!(stats.state, CircuitState::Closed);

    // one token per attempt
    let limiter = registry.limiters().get("yelp").unwrap();
    assert!(limiter.tokens() < 48.0, "tokens {}", limiter.tokens());
}

#[tokio::test]
async fn rate_limited_response_waits_for_retry_after() {
    let server = CannedServer::start(vec![
        response("429 Too Many Requests", "Retry-After: 1\r\n", "slow down"),
        ok(),
    ])
    .await;
    let (kit, _registry) = toolkit(source_config(3, 10));

    let started = Instant::now();
    let resp = kit.execute("search", OutboundRequest::get(server.url("/search"))).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(server.hits(), 2);
    assert!(started.elapsed() >= Duration::from_millis(900), "waited {:?}", started.elapsed());
}

#[tokio::test]
async fn open_circuit_ends_the_retry_loop() {
    let server = CannedServer::start(vec![unavailable()]).await;
    let (kit, registry) = toolkit(source_config(5, 2));

    let err = kit
        .execute("search", OutboundRequest::get(server.url("/search")))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::CircuitOpen { .. }), "{err:?}");
    // two failures trip the breaker, the third attempt never reaches the wire
    assert_eq!(server.hits(), 2);

    let stats = registry.breakers().get("yelp", "search").unwrap().stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!((stats.failures, stats.rejects), (2, 1));
}

#[tokio::test]
async fn non_retryable_status_is_attempted_once() {
    let server = CannedServer::start(vec![response("404 Not Found", "", "missing")]).await;
    let (kit, _registry) = toolkit(source_config(3, 10));

    let err = kit
        .execute("search", OutboundRequest::get(server.url("/search")))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn every_send_draws_from_the_limiter() {
    let server = CannedServer::start(vec![ok()]).await;
    let limiter = Arc::new(TokenBucket::per_window("yelp", 2, Duration::from_secs(1)));
    let client = ResilientClient::api("Yelp", limiter.clone(), Duration::from_secs(5)).unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        client.send(OutboundRequest::get(server.url("/ping"))).await.unwrap();
    }
    // burst of two, the third waits ~500ms for a refill
    assert!(started.elapsed() >= Duration::from_millis(400), "elapsed {:?}", started.elapsed());
    assert_eq!(server.hits(), 3);
    assert!(limiter.tokens() < 1.0);
}

#[tokio::test]
async fn proxied_calls_update_proxy_health() {
    // The canned server stands in for the proxy; the upstream host never resolves.
    let server = CannedServer::start(vec![ok(), response("502 Bad Gateway", "", "bad gateway")]).await;
    let proxy_url = format!("http://{}", server.addr);
    let pool = Arc::new(ProxyPool::with_proxies(
        ProxyPoolConfig {
            cooldown: Duration::ZERO,
            auto_remove: false,
            ..ProxyPoolConfig::default()
        },
        [proxy_url.clone()],
    ));
    let limiter = Arc::new(TokenBucket::new("angi", 10, 10.0));
    let client = ResilientClient::scraping("Angi", limiter, pool.clone(), Duration::from_secs(5)).unwrap();

    let first = client.send(OutboundRequest::get("http://listings.invalid/biz/1")).await;
    assert_eq!(first.unwrap().status, 200);
    let second = client.send(OutboundRequest::get("http://listings.invalid/biz/2")).await;
    assert_eq!(second.unwrap_err().status(), Some(502));

    let proxy = pool.get(&proxy_url).unwrap();
    assert_eq!((proxy.success_count, proxy.fail_count), (1, 1));

    let requests = server.requests.lock().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with("GET http://listings.invalid/biz/1"), "{}", requests[0]);
    assert!(requests[0].to_ascii_lowercase().contains("user-agent: mozilla/5.0"));
}
