// src/dedup/mod.rs
//! Duplicate detection against active stored records.
//!
//! Rules run in strict priority order and the first rule that matches any
//! record decides:
//! 1. exact normalized phone
//! 2. exact website domain
//! 3. exact `(source, source_id)`, own or folded in by an earlier merge
//! 4. fuzzy normalized name (bigram Dice above the threshold)
//!
//! Exact rules take the first matching record in the order given. The fuzzy
//! rule takes the highest similarity; ties keep the earlier record.

pub mod merge;
pub mod similarity;

use serde::Serialize;
use tracing::debug;

use crate::ingest::normalize::{extract_domain, normalize_company_name, normalize_phone};
use crate::model::{CandidateRecord, StoredRecord};

pub use merge::{merge_candidate, merge_records};
pub use similarity::dice_coefficient;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactPhone,
    ExactWebsite,
    ExactSourceId,
    FuzzyName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: StoredRecord,
    /// 1.0 for exact rules, the similarity for fuzzy matches.
    pub confidence: f64,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    New,
    /// Matches an existing record and adds nothing to it.
    Duplicate(MatchResult),
    /// Matches an existing record; `merged` is that record with the gaps filled.
    Merge { result: MatchResult, merged: StoredRecord },
}

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    fuzzy_threshold: f64,
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FUZZY_THRESHOLD)
    }

    pub fn with_threshold(fuzzy_threshold: f64) -> Self {
        Self {
            fuzzy_threshold: fuzzy_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Best match for `candidate` among the active records in `existing`.
    pub fn find_match(&self, candidate: &CandidateRecord, existing: &[StoredRecord]) -> Option<MatchResult> {
        let active: Vec<&StoredRecord> = existing.iter().filter(|r| r.is_active()).collect();
        if active.is_empty() {
            return None;
        }
        let exact = |reason: MatchReason, r: &StoredRecord| MatchResult {
            matched: r.clone(),
            confidence: 1.0,
            reason,
        };

        if let Some(phone) = candidate.phone.as_deref().and_then(normalize_phone) {
            if let Some(r) = active
                .iter()
                .find(|r| r.normalized_phone.as_deref() == Some(phone.as_str()))
            {
                return Some(exact(MatchReason::ExactPhone, r));
            }
        }

        if let Some(domain) = candidate.website.as_deref().and_then(extract_domain) {
            if let Some(r) = active
                .iter()
                .find(|r| r.record.website.as_deref().and_then(extract_domain).as_deref() == Some(domain.as_str()))
            {
                return Some(exact(MatchReason::ExactWebsite, r));
            }
        }

        if let Some(sid) = candidate.source_id.as_deref().filter(|s| !s.is_empty()) {
            let tag = merge::source_id_tag(candidate.source, sid);
            if let Some(r) = active.iter().find(|r| {
                (r.record.source == candidate.source && r.record.source_id.as_deref() == Some(sid))
                    || r.metadata.merged_from.contains(&tag)
            }) {
                return Some(exact(MatchReason::ExactSourceId, r));
            }
        }

        let name = normalize_company_name(&candidate.company_name);
        if name.is_empty() {
            return None;
        }
        let mut best: Option<(&StoredRecord, f64)> = None;
        for r in &active {
            if r.normalized_name.is_empty() {
                continue;
            }
            let sim = dice_coefficient(&name, &r.normalized_name);
            if sim > self.fuzzy_threshold && best.map_or(true, |(_, b)| sim > b) {
                best = Some((r, sim));
            }
        }
        best.map(|(r, sim)| MatchResult {
            matched: r.clone(),
            confidence: sim,
            reason: MatchReason::FuzzyName,
        })
    }

    /// NEW, plain DUPLICATE, or MERGE (when the candidate fills gaps).
    pub fn decide(&self, candidate: &CandidateRecord, existing: &[StoredRecord]) -> DedupDecision {
        let Some(result) = self.find_match(candidate, existing) else {
            return DedupDecision::New;
        };
        debug!(
            target: "dedup",
            candidate = %candidate.company_name,
            matched = %result.matched.id,
            reason = ?result.reason,
            confidence = result.confidence,
            "duplicate found"
        );
        let merged = merge_candidate(&result.matched, candidate);
        if merged == result.matched {
            DedupDecision::Duplicate(result)
        } else {
            DedupDecision::Merge { result, merged }
        }
    }
}
