// src/model.rs
//! Record types flowing through ingestion: source-provided candidates and the
//! stored records they become.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, Result};
use crate::ingest::normalize::{normalize_address, normalize_company_name, normalize_phone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadSource {
    #[serde(rename = "Google Maps", alias = "google_maps")]
    GoogleMaps,
    #[serde(rename = "Yelp", alias = "yelp")]
    Yelp,
    #[serde(rename = "LinkedIn")]
    LinkedIn,
    #[serde(rename = "HomeAdvisor")]
    HomeAdvisor,
    #[serde(rename = "Angi")]
    Angi,
    #[serde(rename = "Thumbtack")]
    Thumbtack,
    #[serde(rename = "BBB")]
    Bbb,
    #[serde(rename = "Manual")]
    Manual,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::GoogleMaps => "Google Maps",
            LeadSource::Yelp => "Yelp",
            LeadSource::LinkedIn => "LinkedIn",
            LeadSource::HomeAdvisor => "HomeAdvisor",
            LeadSource::Angi => "Angi",
            LeadSource::Thumbtack => "Thumbtack",
            LeadSource::Bbb => "BBB",
            LeadSource::Manual => "Manual",
        }
    }

    /// Key used for per-source config tables and registry entries.
    pub fn config_key(&self) -> &'static str {
        match self {
            LeadSource::GoogleMaps => "google_maps",
            LeadSource::Yelp => "yelp",
            LeadSource::LinkedIn => "linkedin",
            LeadSource::HomeAdvisor => "homeadvisor",
            LeadSource::Angi => "angi",
            LeadSource::Thumbtack => "thumbtack",
            LeadSource::Bbb => "bbb",
            LeadSource::Manual => "manual",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trade {
    #[serde(rename = "HVAC")]
    Hvac,
    #[serde(rename = "Plumbing")]
    Plumbing,
    #[serde(rename = "Electrical")]
    Electrical,
    #[serde(rename = "Roofing")]
    Roofing,
    #[serde(rename = "General Contractor")]
    General,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Trade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trade::Hvac => "HVAC",
            Trade::Plumbing => "Plumbing",
            Trade::Electrical => "Electrical",
            Trade::Roofing => "Roofing",
            Trade::General => "General Contractor",
            Trade::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    New,
    Enriched,
    Verified,
    Exported,
    Invalid,
    Duplicate,
}

/// Search area. At least one part must be set for an ingest request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub city: Option<String>,
    /// State / province.
    #[serde(default)]
    pub region: Option<String>,
    /// County or similar sub-region.
    #[serde(default)]
    pub admin_area: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        [&self.city, &self.region, &self.admin_area, &self.postal_code]
            .iter()
            .all(|p| p.as_deref().map(str::trim).unwrap_or_default().is_empty())
    }

    /// "City, County, State[, Zip]" with blank parts skipped.
    pub fn display(&self, include_postal_code: bool) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for p in [&self.city, &self.admin_area, &self.region] {
            if let Some(v) = p.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                parts.push(v);
            }
        }
        if include_postal_code {
            if let Some(v) = self.postal_code.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                parts.push(v);
            }
        }
        parts.join(", ")
    }
}

/// Immutable, source-provided facts about one business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub company_name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub trade: Trade,
    pub source: LeadSource,
    pub source_url: Option<String>,
    /// Identity of the business at the source (e.g. a place id).
    pub source_id: Option<String>,
    pub rating: Option<f32>,
    pub review_count: Option<u32>,
    pub scraped_at: DateTime<Utc>,
}

impl CandidateRecord {
    /// Minimal candidate with only the required fields set.
    pub fn new(company_name: impl Into<String>, trade: Trade, source: LeadSource) -> Self {
        Self {
            company_name: company_name.into(),
            contact_name: None,
            email: None,
            phone: None,
            website: None,
            address: None,
            city: None,
            state: None,
            zip_code: None,
            trade,
            source,
            source_url: None,
            source_id: None,
            rating: None,
            review_count: None,
            scraped_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.company_name.trim().is_empty() {
            return Err(IngestError::validation("companyName", "company name is empty"));
        }
        if let Some(r) = self.rating {
            if !(0.0..=5.0).contains(&r) {
                return Err(IngestError::validation(
                    "rating",
                    format!("rating {r} outside 0..=5"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Ids (or `source:sourceId` tags) of records merged into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_provider: Option<String>,
    #[serde(default)]
    pub scrape_attempts: u32,
}

/// A persisted record: candidate facts plus identity, match keys and lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    #[serde(flatten)]
    pub record: CandidateRecord,
    pub normalized_name: String,
    pub normalized_phone: Option<String>,
    pub normalized_address: Option<String>,
    pub status: LeadStatus,
    pub notes: String,
    pub confidence: f32,
    pub duplicate_of: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub metadata: RecordMetadata,
}

impl StoredRecord {
    /// Assigns a fresh id and derives the match keys.
    pub fn from_candidate(record: CandidateRecord) -> Self {
        let mut stored = Self {
            id: uuid::Uuid::new_v4().to_string(),
            record,
            normalized_name: String::new(),
            normalized_phone: None,
            normalized_address: None,
            status: LeadStatus::New,
            notes: String::new(),
            confidence: 0.0,
            duplicate_of: None,
            enriched_at: None,
            verified_at: None,
            metadata: RecordMetadata {
                scrape_attempts: 1,
                ..RecordMetadata::default()
            },
        };
        stored.refresh_keys();
        stored
    }

    /// Re-derive normalized keys from the displayed fields.
    pub fn refresh_keys(&mut self) {
        self.normalized_name = normalize_company_name(&self.record.company_name);
        self.normalized_phone = self.record.phone.as_deref().and_then(normalize_phone);
        self.normalized_address = self.record.address.as_deref().and_then(normalize_address);
    }

    pub fn is_active(&self) -> bool {
        self.status != LeadStatus::Duplicate
    }
}

/// Partial update applied by a repository. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub record: Option<CandidateRecord>,
    pub status: Option<LeadStatus>,
    pub notes: Option<String>,
    pub confidence: Option<f32>,
    pub duplicate_of: Option<Option<String>>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub metadata: Option<RecordMetadata>,
}

impl RecordPatch {
    /// Patch carrying the outcome of a merge onto the canonical record.
    pub fn from_merged(merged: &StoredRecord) -> Self {
        Self {
            record: Some(merged.record.clone()),
            confidence: Some(merged.confidence),
            enriched_at: merged.enriched_at,
            verified_at: merged.verified_at,
            metadata: Some(merged.metadata.clone()),
            ..Self::default()
        }
    }

    /// Apply onto a stored record, re-deriving keys when facts changed.
    pub fn apply(self, target: &mut StoredRecord) {
        let facts_changed = self.record.is_some();
        if let Some(r) = self.record {
            target.record = r;
        }
        if let Some(s) = self.status {
            target.status = s;
        }
        if let Some(n) = self.notes {
            target.notes = n;
        }
        if let Some(c) = self.confidence {
            target.confidence = c;
        }
        if let Some(d) = self.duplicate_of {
            target.duplicate_of = d;
        }
        if self.enriched_at.is_some() {
            target.enriched_at = self.enriched_at;
        }
        if self.verified_at.is_some() {
            target.verified_at = self.verified_at;
        }
        if let Some(m) = self.metadata {
            target.metadata = m;
        }
        if facts_changed {
            target.refresh_keys();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_and_trades_use_display_names_on_the_wire() {
        let s = serde_json::to_string(&LeadSource::GoogleMaps).unwrap();
        assert_eq!(s, "\"Google Maps\"");
        let back: LeadSource = serde_json::from_str("\"google_maps\"").unwrap();
        assert_eq!(back, LeadSource::GoogleMaps);
        let t: Trade = serde_json::from_str("\"General Contractor\"").unwrap();
        assert_eq!(t, Trade::General);
    }

    #[test]
    fn stored_record_derives_keys() {
        let mut c = CandidateRecord::new("Joe's Plumbing LLC", Trade::Plumbing, LeadSource::Yelp);
        c.phone = Some("(914) 555-0100".into());
        c.address = Some("12 Main Street".into());
        let s = StoredRecord::from_candidate(c);
        assert_eq!(s.normalized_name, "joes plumbing");
        assert_eq!(s.normalized_phone.as_deref(), Some("+19145550100"));
        assert_eq!(s.normalized_address.as_deref(), Some("12 main st"));
        assert!(s.is_active());
    }

    #[test]
    fn empty_name_is_a_validation_error() {
        let c = CandidateRecord::new("  ", Trade::Hvac, LeadSource::GoogleMaps);
        assert!(matches!(c.validate(), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn location_display_skips_blank_parts() {
        let loc = Location {
            city: Some("White Plains".into()),
            region: Some("NY".into()),
            admin_area: Some(" ".into()),
            postal_code: Some("10601".into()),
        };
        assert_eq!(loc.display(false), "White Plains, NY");
        assert_eq!(loc.display(true), "White Plains, NY, 10601");
        assert!(Location::default().is_empty());
    }
}
