// src/ingest/providers/mod.rs
pub mod google_places;
pub mod yelp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::http::{HttpResponse, OutboundRequest, ResilientClient};
use crate::ingest::config::{Credentials, IngestConfig, SourceConfig};
use crate::ingest::types::SourceIntegration;
use crate::model::LeadSource;
use crate::registry::ResilienceRegistry;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

pub use google_places::GooglePlaces;
pub use yelp::Yelp;

/// The resilience wiring every integration shares: a client in the mode the
/// source calls for, its breakers and its retry policy.
pub struct SourceToolkit {
    source: LeadSource,
    config: SourceConfig,
    client: ResilientClient,
    registry: Arc<ResilienceRegistry>,
    circuit: CircuitBreakerConfig,
    retry: RetryPolicy,
}

impl SourceToolkit {
    pub fn new(
        source: LeadSource,
        config: SourceConfig,
        request_timeout: Duration,
        registry: Arc<ResilienceRegistry>,
    ) -> Result<Self> {
        let limiter = registry.limiter_for(source, &config);
        let client = if config.proxy_required {
            ResilientClient::scraping(source.as_str(), limiter, registry.proxies().clone(), request_timeout)?
        } else {
            ResilientClient::api(source.as_str(), limiter, request_timeout)?
        };
        Ok(Self {
            source,
            circuit: config.circuit_config(),
            retry: config.retry_policy(),
            config,
            client,
            registry,
        })
    }

    pub fn source(&self) -> LeadSource {
        self.source
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Retry around a breaker-guarded call, breaker keyed by `operation`.
    pub async fn execute(&self, operation: &str, request: OutboundRequest) -> Result<HttpResponse> {
        let breaker = self
            .registry
            .breakers()
            .get_or_create(self.source.config_key(), operation, &self.circuit);
        let label = breaker.name().to_string();
        self.retry
            .run(&label, || {
                let req = request.clone();
                let breaker = breaker.clone();
                async move { breaker.call(|| self.client.send(req)).await }
            })
            .await
    }
}

/// Integrations for every enabled source that has one.
///
/// Missing credentials do not fail construction; they surface as a
/// configuration error when the source is first driven.
pub fn build_integrations(
    config: &IngestConfig,
    credentials: &Credentials,
    registry: &Arc<ResilienceRegistry>,
) -> Result<HashMap<LeadSource, Arc<dyn SourceIntegration>>> {
    let mut out: HashMap<LeadSource, Arc<dyn SourceIntegration>> = HashMap::new();
    let timeout = config.request_timeout();

    let google = config.source(LeadSource::GoogleMaps);
    if google.enabled {
        warn_if_unkeyed(credentials, LeadSource::GoogleMaps);
        let toolkit = SourceToolkit::new(LeadSource::GoogleMaps, google, timeout, registry.clone())?;
        out.insert(
            LeadSource::GoogleMaps,
            Arc::new(GooglePlaces::new(toolkit, credentials.google_places_api_key.clone())),
        );
    }

    let yelp = config.source(LeadSource::Yelp);
    if yelp.enabled {
        warn_if_unkeyed(credentials, LeadSource::Yelp);
        let toolkit = SourceToolkit::new(LeadSource::Yelp, yelp, timeout, registry.clone())?;
        out.insert(
            LeadSource::Yelp,
            Arc::new(Yelp::new(toolkit, credentials.yelp_api_key.clone())),
        );
    }

    info!(target: "ingest", integrations = out.len(), "source integrations built");
    Ok(out)
}

fn warn_if_unkeyed(credentials: &Credentials, source: LeadSource) {
    if let Err(e) = credentials.require(source) {
        warn!(target: "ingest", source = %source, error = %e, "source enabled without credentials");
    }
}
