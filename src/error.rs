// src/error.rs
//! Error taxonomy shared by the HTTP stack, the resilience primitives, the
//! provider integrations and the ingestion coordinator.
//!
//! Variants carry owned strings (not the underlying library errors) so an error
//! can be cloned into progress events and retry observers.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Missing or invalid credentials / settings. Fatal for the affected source.
    #[error("configuration error ({key}): {message}")]
    Configuration { key: String, message: String },

    /// Upstream signaled throttling (HTTP 429).
    #[error("rate limited by {provider}; retry after {}ms", retry_after.as_millis())]
    RateLimited {
        provider: String,
        retry_after: Duration,
    },

    /// Anti-automation detection (captcha, forbidden page).
    #[error("blocked by {provider}: {block_type}")]
    Blocked { provider: String, block_type: String },

    /// Non-success HTTP status that is neither throttling nor a block.
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connection reset, DNS, socket timeout).
    #[error("network error: {message}")]
    Network { message: String },

    /// A guarded call exceeded the circuit breaker timeout.
    #[error("timeout: {operation} did not complete within {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Rejected without a network attempt because the circuit is open.
    #[error("circuit open: {name}")]
    CircuitOpen { name: String },

    /// Malformed candidate data.
    #[error("validation error ({field}): {message}")]
    Validation { field: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    /// Upstream payload could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The ingest request itself is malformed (no sources, no categories, no location).
    #[error("invalid ingest request: {0}")]
    InvalidRequest(String),
}

impl IngestError {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Provider-supplied backoff hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Explicit retryability flag. `None` means "decide by message/status".
    pub fn retryable_flag(&self) -> Option<bool> {
        match self {
            Self::RateLimited { .. } | Self::Blocked { .. } | Self::Timeout { .. } => Some(true),
            Self::Configuration { .. }
            | Self::CircuitOpen { .. }
            | Self::Validation { .. }
            | Self::Parse(_)
            | Self::InvalidRequest(_) => Some(false),
            Self::Http { .. } | Self::Network { .. } | Self::Storage(_) => None,
        }
    }

    /// Errors that must never be retried, whatever their message says.
    pub fn is_never_retried(&self) -> bool {
        self.retryable_flag() == Some(false)
    }

    /// Errors that end a whole source rather than a single query.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return IngestError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            return IngestError::Parse(err.to_string());
        } else {
            "request failed"
        };
        IngestError::Network {
            message: format!("{kind}: {err}"),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}
