// src/ingest/providers/yelp.rs
//! Yelp Fusion API, business search by category.

use async_trait::async_trait;
use chrono::Utc;
use metrics::histogram;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::http::OutboundRequest;
use crate::ingest::normalize::{clean_optional, normalize_text};
use crate::ingest::providers::SourceToolkit;
use crate::ingest::types::{Page, PageCursor, SourceIntegration, SourceQuery};
use crate::model::{CandidateRecord, LeadSource, Trade};

const API_BASE: &str = "https://api.yelp.com/v3";
pub const PAGE_SIZE: u32 = 50;
/// Yelp refuses `offset + limit` beyond this.
pub const MAX_OFFSET: u32 = 1_000;

fn trade_categories(trade: Trade) -> &'static [&'static str] {
    match trade {
        Trade::Hvac => &["hvac", "heating", "airconditioning", "hvacr"],
        Trade::Plumbing => &["plumbing", "waterheaterinstallation"],
        Trade::Electrical => &["electricians", "lighting", "electricalrepair"],
        Trade::Roofing => &["roofing", "gutterservices"],
        Trade::General => &["contractors", "homeservices"],
        Trade::Unknown => &["homeservices"],
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    businesses: Vec<Business>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct Business {
    id: String,
    name: String,
    #[serde(default)]
    is_closed: bool,
    url: Option<String>,
    review_count: Option<u32>,
    rating: Option<f32>,
    #[serde(default)]
    location: BusinessLocation,
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BusinessLocation {
    address1: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
}

fn business_to_candidate(b: Business, trade: Trade) -> CandidateRecord {
    let mut c = CandidateRecord::new(normalize_text(&b.name), trade, LeadSource::Yelp);
    c.phone = clean_optional(b.phone.as_deref());
    // Yelp does not expose the business website.
    c.address = clean_optional(b.location.address1.as_deref());
    c.city = clean_optional(b.location.city.as_deref());
    c.state = clean_optional(b.location.state.as_deref());
    c.zip_code = clean_optional(b.location.zip_code.as_deref());
    c.source_url = b.url;
    c.source_id = Some(b.id);
    c.rating = b.rating;
    c.review_count = b.review_count;
    c.scraped_at = Utc::now();
    c
}

/// Decode a business search response fetched at `offset`. Closed businesses
/// are skipped but still advance the offset.
pub fn parse_page(body: &str, trade: Trade, offset: u32) -> Result<Page> {
    let t0 = std::time::Instant::now();
    let resp: SearchResponse = serde_json::from_str(body)?;
    let returned = resp.businesses.len() as u32;
    let next_offset = offset + returned;
    let next = (returned > 0 && next_offset < resp.total && next_offset < MAX_OFFSET)
        .then_some(PageCursor::Offset(next_offset));
    let records = resp
        .businesses
        .into_iter()
        .filter(|b| !b.is_closed)
        .map(|b| business_to_candidate(b, trade))
        .collect();
    histogram!("ingest_parse_ms", "source" => "yelp").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(Page { records, next })
}

pub struct Yelp {
    toolkit: SourceToolkit,
    api_key: Option<String>,
}

impl Yelp {
    pub fn new(toolkit: SourceToolkit, api_key: Option<String>) -> Self {
        Self { toolkit, api_key }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            IngestError::configuration("YELP_API_KEY", "Yelp API key not configured; set YELP_API_KEY")
        })
    }
}

#[async_trait]
impl SourceIntegration for Yelp {
    fn source(&self) -> LeadSource {
        LeadSource::Yelp
    }

    /// One term per trade: the comma-joined category aliases.
    fn search_terms(&self, trade: Trade) -> Vec<String> {
        vec![trade_categories(trade).join(",")]
    }

    fn max_pages_per_term(&self) -> u32 {
        self.toolkit.config().max_pages.clamp(1, MAX_OFFSET / PAGE_SIZE)
    }

    fn ensure_configured(&self) -> Result<()> {
        self.key().map(|_| ())
    }

    async fn fetch_page(&self, query: &SourceQuery, term: &str, cursor: Option<&PageCursor>) -> Result<Page> {
        let key = self.key()?;
        let offset = match cursor {
            Some(PageCursor::Offset(o)) => *o,
            _ => 0,
        };
        let req = OutboundRequest::get(format!("{API_BASE}/businesses/search"))
            .header("Authorization", format!("Bearer {key}"))
            .query("location", query.location_text(true))
            .query("categories", term)
            .query("limit", PAGE_SIZE)
            .query("offset", offset);
        let resp = self.toolkit.execute("search", req).await?;
        parse_page(&resp.body, query.trade, offset)
    }

    async fn test_connection(&self) -> bool {
        let Ok(key) = self.key() else {
            warn!(target: "source:yelp", "connection test skipped: no API key");
            return false;
        };
        let req = OutboundRequest::get(format!("{API_BASE}/autocomplete"))
            .header("Authorization", format!("Bearer {key}"))
            .query("text", "plumber");
        match self.toolkit.execute("probe", req).await {
            Ok(_) => {
                info!(target: "source:yelp", "Yelp API connection successful");
                true
            }
            Err(e) => {
                warn!(target: "source:yelp", error = %e, "Yelp API connection failed");
                false
            }
        }
    }
}
