// src/resilience/mod.rs
pub mod circuit_breaker;
pub mod retry;
pub mod rolling;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitStats,
};
pub use retry::{with_retry, RetryAttempt, RetryPolicy};
