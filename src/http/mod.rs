// src/http/mod.rs
pub mod client;
pub mod proxy_pool;
pub mod rate_limiter;

pub use client::{ClientMode, HttpResponse, OutboundRequest, ResilientClient};
pub use proxy_pool::{Proxy, ProxyPool, ProxyPoolConfig, ProxyProtocol, ProxyStats};
pub use rate_limiter::{RateLimiterRegistry, TokenBucket};
