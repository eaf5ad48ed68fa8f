// src/dedup/merge.rs
//! Field-by-field merges. The canonical record keeps its identity and every
//! non-empty value it already has; gaps are filled from the other side.

use crate::model::{CandidateRecord, LeadSource, StoredRecord, Trade};

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

fn fill(slot: &mut Option<String>, other: &Option<String>) {
    if is_blank(slot) && !is_blank(other) {
        *slot = other.clone();
    }
}

fn fill_copy<T: Copy>(slot: &mut Option<T>, other: Option<T>) {
    if slot.is_none() {
        *slot = other;
    }
}

/// Fill the gaps of `target` from `other`.
fn fill_facts(target: &mut CandidateRecord, other: &CandidateRecord) {
    if target.company_name.trim().is_empty() && !other.company_name.trim().is_empty() {
        target.company_name = other.company_name.clone();
    }
    fill(&mut target.contact_name, &other.contact_name);
    fill(&mut target.email, &other.email);
    fill(&mut target.phone, &other.phone);
    fill(&mut target.website, &other.website);
    fill(&mut target.address, &other.address);
    fill(&mut target.city, &other.city);
    fill(&mut target.state, &other.state);
    fill(&mut target.zip_code, &other.zip_code);
    // A source id only means something next to its own source.
    if target.source == other.source {
        fill(&mut target.source_url, &other.source_url);
        fill(&mut target.source_id, &other.source_id);
    }
    fill_copy(&mut target.rating, other.rating);
    fill_copy(&mut target.review_count, other.review_count);
    if target.trade == Trade::Unknown && other.trade != Trade::Unknown {
        target.trade = other.trade;
    }
}

/// `source:source_id` tag kept in `merged_from` for ids of another source.
pub(crate) fn source_id_tag(source: LeadSource, source_id: &str) -> String {
    format!("{}:{source_id}", source.config_key())
}

fn candidate_tag(c: &CandidateRecord) -> String {
    match c.source_id.as_deref() {
        Some(id) => source_id_tag(c.source, id),
        None => format!("{}:{}", c.source.config_key(), c.company_name),
    }
}

/// Foreign `(source, source_id)` of `other` that `target` does not hold yet.
fn foreign_source_id(target: &StoredRecord, other: &CandidateRecord) -> Option<String> {
    let id = other.source_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    if other.source == target.record.source {
        return None;
    }
    let tag = source_id_tag(other.source, id);
    (!target.metadata.merged_from.contains(&tag)).then_some(tag)
}

/// Merge a newly fetched candidate into an existing record.
///
/// Returns the existing record unchanged when the candidate adds nothing. An
/// id from another source counts as new information and is kept as a tag.
pub fn merge_candidate(existing: &StoredRecord, candidate: &CandidateRecord) -> StoredRecord {
    let mut merged = existing.clone();
    fill_facts(&mut merged.record, candidate);
    let foreign = foreign_source_id(existing, candidate);
    if merged.record != existing.record || foreign.is_some() {
        let tag = candidate_tag(candidate);
        if !merged.metadata.merged_from.contains(&tag) {
            merged.metadata.merged_from.push(tag);
        }
        merged.refresh_keys();
    }
    merged
}

/// Merge two stored records; `canonical` keeps its id and status.
pub fn merge_records(canonical: &StoredRecord, duplicate: &StoredRecord) -> StoredRecord {
    let mut merged = canonical.clone();
    fill_facts(&mut merged.record, &duplicate.record);
    if merged.notes.trim().is_empty() {
        merged.notes = duplicate.notes.clone();
    }
    fill_copy(&mut merged.enriched_at, duplicate.enriched_at);
    fill_copy(&mut merged.verified_at, duplicate.verified_at);
    if merged.metadata.enrichment_provider.is_none() {
        merged.metadata.enrichment_provider = duplicate.metadata.enrichment_provider.clone();
    }
    merged.confidence = merged.confidence.max(duplicate.confidence);
    let foreign = foreign_source_id(canonical, &duplicate.record);
    for id in std::iter::once(&duplicate.id)
        .chain(foreign.iter())
        .chain(duplicate.metadata.merged_from.iter())
    {
        if *id != merged.id && !merged.metadata.merged_from.contains(id) {
            merged.metadata.merged_from.push(id.clone());
        }
    }
    merged.refresh_keys();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str) -> StoredRecord {
        let mut c = CandidateRecord::new(name, Trade::Plumbing, LeadSource::GoogleMaps);
        c.phone = Some("(914) 555-0100".into());
        c.source_id = Some("g-1".into());
        StoredRecord::from_candidate(c)
    }

    #[test]
    fn candidate_without_news_changes_nothing() {
        let existing = stored("Joe's Plumbing");
        let mut c = CandidateRecord::new("Joes Plumbing Inc", Trade::Plumbing, LeadSource::Yelp);
        c.phone = Some("".into());
        let merged = merge_candidate(&existing, &c);
        assert_eq!(merged, existing);
    }

    #[test]
    fn candidate_fills_gaps_only() {
        let existing = stored("Joe's Plumbing");
        let mut c = CandidateRecord::new("Other Name", Trade::Hvac, LeadSource::Yelp);
        c.phone = Some("555-9999".into());
        c.email = Some("joe@joesplumbing.com".into());
        c.source_id = Some("y-9".into());
        let merged = merge_candidate(&existing, &c);
        assert_eq!(merged.id, existing.id);
        assert_eq!(merged.record.company_name, "Joe's Plumbing");
        assert_eq!(merged.record.phone.as_deref(), Some("(914) 555-0100"));
        assert_eq!(merged.record.email.as_deref(), Some("joe@joesplumbing.com"));
        assert_eq!(merged.metadata.merged_from, vec!["yelp:y-9".to_string()]);
    }

    #[test]
    fn merging_records_keeps_canonical_identity() {
        let canonical = stored("Joe's Plumbing");
        let mut dup = stored("Joes Plumbing");
        dup.record.website = Some("https://joesplumbing.com".into());
        dup.confidence = 0.9;
        let merged = merge_records(&canonical, &dup);
        assert_eq!(merged.id, canonical.id);
        assert_eq!(merged.record.website.as_deref(), Some("https://joesplumbing.com"));
        assert_eq!(merged.metadata.merged_from, vec![dup.id.clone()]);
        assert!((merged.confidence - 0.9).abs() < 1e-6);
    }
}
