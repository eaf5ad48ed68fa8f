// src/ingest/providers/google_places.rs
//! Google Places API (New), Text Search.

use async_trait::async_trait;
use chrono::Utc;
use metrics::histogram;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::http::OutboundRequest;
use crate::ingest::normalize::{clean_optional, normalize_text};
use crate::ingest::providers::SourceToolkit;
use crate::ingest::types::{Page, PageCursor, SourceIntegration, SourceQuery};
use crate::model::{CandidateRecord, LeadSource, Trade};

const API_BASE: &str = "https://places.googleapis.com/v1";
/// Upstream maximum per Text Search request.
pub const PAGE_SIZE: u32 = 20;

const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,\
places.addressComponents,places.nationalPhoneNumber,places.internationalPhoneNumber,\
places.websiteUri,places.googleMapsUri,places.rating,places.userRatingCount,\
places.types,places.primaryType,nextPageToken";

fn trade_search_terms(trade: Trade) -> &'static [&'static str] {
    match trade {
        Trade::Hvac => &[
            "HVAC contractor",
            "heating and cooling",
            "air conditioning repair",
            "furnace repair",
        ],
        Trade::Plumbing => &[
            "plumber",
            "plumbing contractor",
            "plumbing repair",
            "emergency plumber",
        ],
        Trade::Electrical => &["electrician", "electrical contractor", "electrical repair"],
        Trade::Roofing => &["roofing contractor", "roof repair", "roofer"],
        Trade::General => &["general contractor", "home services"],
        Trade::Unknown => &["contractor"],
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextSearchResponse {
    #[serde(default)]
    places: Vec<Place>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    id: String,
    display_name: Option<DisplayName>,
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    national_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website_uri: Option<String>,
    google_maps_uri: Option<String>,
    rating: Option<f32>,
    user_rating_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressComponent {
    long_text: String,
    short_text: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Default)]
struct AddressParts {
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
}

fn address_parts(components: &[AddressComponent]) -> AddressParts {
    let mut number = None;
    let mut route = None;
    let mut parts = AddressParts::default();
    for c in components {
        let has = |t: &str| c.types.iter().any(|x| x == t);
        if has("street_number") {
            number = Some(c.long_text.clone());
        } else if has("route") {
            route = Some(c.long_text.clone());
        } else if has("locality") {
            parts.city = Some(c.long_text.clone());
        } else if has("administrative_area_level_1") {
            parts.state = Some(c.short_text.clone());
        } else if has("postal_code") {
            parts.zip = Some(c.long_text.clone());
        }
    }
    parts.street = match (number, route) {
        (Some(n), Some(r)) => Some(format!("{n} {r}")),
        (None, r) => r,
        (Some(_), None) => None,
    };
    parts
}

/// A place without a display name becomes a nameless candidate, which the
/// stream's validation drops and counts.
fn place_to_candidate(place: Place, trade: Trade) -> CandidateRecord {
    let name = place
        .display_name
        .map(|d| normalize_text(&d.text))
        .unwrap_or_default();
    let parts = address_parts(&place.address_components);
    let mut c = CandidateRecord::new(name, trade, LeadSource::GoogleMaps);
    c.phone = clean_optional(
        place
            .national_phone_number
            .as_deref()
            .or(place.international_phone_number.as_deref()),
    );
    c.website = clean_optional(place.website_uri.as_deref());
    c.address = clean_optional(parts.street.as_deref().or(place.formatted_address.as_deref()));
    c.city = clean_optional(parts.city.as_deref());
    c.state = clean_optional(parts.state.as_deref());
    c.zip_code = clean_optional(parts.zip.as_deref());
    c.source_url = place.google_maps_uri;
    c.source_id = Some(place.id);
    c.rating = place.rating;
    c.review_count = place.user_rating_count;
    c.scraped_at = Utc::now();
    c
}

/// Decode a Text Search response into a page.
pub fn parse_page(body: &str, trade: Trade) -> Result<Page> {
    let t0 = std::time::Instant::now();
    let resp: TextSearchResponse = serde_json::from_str(body)?;
    let next = if resp.places.is_empty() {
        None
    } else {
        resp.next_page_token
            .filter(|t| !t.is_empty())
            .map(PageCursor::Token)
    };
    let records = resp
        .places
        .into_iter()
        .map(|p| place_to_candidate(p, trade))
        .collect();
    histogram!("ingest_parse_ms", "source" => "google_maps").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(Page { records, next })
}

pub struct GooglePlaces {
    toolkit: SourceToolkit,
    api_key: Option<String>,
}

impl GooglePlaces {
    pub fn new(toolkit: SourceToolkit, api_key: Option<String>) -> Self {
        Self { toolkit, api_key }
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            IngestError::configuration(
                "GOOGLE_PLACES_API_KEY",
                "Google Places API key not configured; set GOOGLE_PLACES_API_KEY",
            )
        })
    }

    fn search_request(&self, key: &str, body: serde_json::Value, field_mask: &str) -> OutboundRequest {
        OutboundRequest::post(format!("{API_BASE}/places:searchText"))
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", field_mask)
            .json(body)
    }
}

#[async_trait]
impl SourceIntegration for GooglePlaces {
    fn source(&self) -> LeadSource {
        LeadSource::GoogleMaps
    }

    fn search_terms(&self, trade: Trade) -> Vec<String> {
        trade_search_terms(trade).iter().map(|s| s.to_string()).collect()
    }

    fn max_pages_per_term(&self) -> u32 {
        self.toolkit.config().max_pages.max(1)
    }

    fn ensure_configured(&self) -> Result<()> {
        self.key().map(|_| ())
    }

    async fn fetch_page(&self, query: &SourceQuery, term: &str, cursor: Option<&PageCursor>) -> Result<Page> {
        let key = self.key()?;
        let text_query = format!("{term} in {}", query.location_text(false));
        let mut body = json!({
            "textQuery": text_query,
            "maxResultCount": PAGE_SIZE,
            "languageCode": "en",
            "regionCode": "US",
        });
        if let Some(PageCursor::Token(token)) = cursor {
            body["pageToken"] = json!(token);
        }
        let resp = self
            .toolkit
            .execute("search", self.search_request(key, body, FIELD_MASK))
            .await?;
        parse_page(&resp.body, query.trade)
    }

    async fn test_connection(&self) -> bool {
        let Ok(key) = self.key() else {
            warn!(target: "source:google_maps", "connection test skipped: no API key");
            return false;
        };
        let body = json!({ "textQuery": "plumber in New York", "maxResultCount": 1 });
        match self
            .toolkit
            .execute("probe", self.search_request(key, body, "places.id"))
            .await
        {
            Ok(_) => {
                info!(target: "source:google_maps", "Google Places API connection successful");
                true
            }
            Err(e) => {
                warn!(target: "source:google_maps", error = %e, "Google Places API connection failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "places": [
        {
          "id": "ChIJ-joes",
          "displayName": {"text": "Joe&#39;s Plumbing LLC", "languageCode": "en"},
          "formattedAddress": "12 Main St, White Plains, NY 10601, USA",
          "addressComponents": [
            {"longText": "12", "shortText": "12", "types": ["street_number"]},
            {"longText": "Main Street", "shortText": "Main St", "types": ["route"]},
            {"longText": "White Plains", "shortText": "White Plains", "types": ["locality", "political"]},
            {"longText": "New York", "shortText": "NY", "types": ["administrative_area_level_1", "political"]},
            {"longText": "10601", "shortText": "10601", "types": ["postal_code"]}
          ],
          "nationalPhoneNumber": "(914) 555-0100",
          "websiteUri": "https://joesplumbing.com/",
          "googleMapsUri": "https://maps.google.com/?cid=1",
          "rating": 4.7,
          "userRatingCount": 88
        },
        {"id": "ChIJ-noname"}
      ],
      "nextPageToken": "tok-2"
    }"#;

    #[test]
    fn parses_places_and_token() {
        let page = parse_page(FIXTURE, Trade::Plumbing).unwrap();
        assert_eq!(page.next, Some(PageCursor::Token("tok-2".into())));
        assert_eq!(page.records.len(), 2);
        let r = &page.records[0];
        assert_eq!(r.company_name, "Joe's Plumbing LLC");
        assert_eq!(r.address.as_deref(), Some("12 Main Street"));
        assert_eq!(r.city.as_deref(), Some("White Plains"));
        assert_eq!(r.state.as_deref(), Some("NY"));
        assert_eq!(r.zip_code.as_deref(), Some("10601"));
        assert_eq!(r.phone.as_deref(), Some("(914) 555-0100"));
        assert_eq!(r.source_id.as_deref(), Some("ChIJ-joes"));
        assert_eq!(r.review_count, Some(88));
        assert_eq!(r.source, LeadSource::GoogleMaps);

        let nameless = &page.records[1];
        assert_eq!(nameless.company_name, "");
        assert!(nameless.validate().is_err());
    }

    #[test]
    fn empty_response_ends_paging() {
        let page = parse_page(r#"{"nextPageToken": "stale"}"#, Trade::Hvac).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next, None);
    }

    #[test]
    fn every_trade_has_terms() {
        for t in [Trade::Hvac, Trade::Plumbing, Trade::Electrical, Trade::Roofing, Trade::General, Trade::Unknown] {
            assert!(!trade_search_terms(t).is_empty());
        }
    }
}
