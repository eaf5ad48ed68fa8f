// tests/dedup.rs
use lead_ingest::dedup::{merge_candidate, DedupDecision, DeduplicationEngine, MatchReason};
use lead_ingest::model::{CandidateRecord, LeadSource, LeadStatus, StoredRecord, Trade};

fn stored(name: &str, source: LeadSource) -> StoredRecord {
    StoredRecord::from_candidate(CandidateRecord::new(name, Trade::Plumbing, source))
}

#[test]
fn same_phone_in_any_format_is_exact() {
    let mut c = CandidateRecord::new("Joe's Plumbing", Trade::Plumbing, LeadSource::GoogleMaps);
    c.phone = Some("(914) 555-0100".into());
    let existing = StoredRecord::from_candidate(c);

    let mut cand = CandidateRecord::new("J. Plumbing Services", Trade::Plumbing, LeadSource::Yelp);
    cand.phone = Some("+1 914.555.0100".into());

    let m = DeduplicationEngine::new().find_match(&cand, &[existing.clone()]).unwrap();
    assert_eq!(m.reason, MatchReason::ExactPhone);
    assert_eq!(m.confidence, 1.0);
    assert_eq!(m.matched.id, existing.id);
}

#[test]
fn website_domain_ignores_scheme_www_and_path() {
    let mut c = CandidateRecord::new("Acme Heating", Trade::Hvac, LeadSource::GoogleMaps);
    c.website = Some("https://www.acmeheating.com/contact".into());
    let existing = StoredRecord::from_candidate(c);

    let mut cand = CandidateRecord::new("Totally Different", Trade::Hvac, LeadSource::Yelp);
    cand.website = Some("acmeheating.com".into());

    let m = DeduplicationEngine::new().find_match(&cand, &[existing]).unwrap();
    assert_eq!(m.reason, MatchReason::ExactWebsite);
}

#[test]
fn source_id_matches_only_within_the_same_source() {
    let mut c = CandidateRecord::new("Acme Roofing", Trade::Roofing, LeadSource::Yelp);
    c.source_id = Some("abc".into());
    let existing = StoredRecord::from_candidate(c);
    let engine = DeduplicationEngine::new();

    let mut same = CandidateRecord::new("Zenith Gutters", Trade::Roofing, LeadSource::Yelp);
    same.source_id = Some("abc".into());
    assert_eq!(
        engine.find_match(&same, &[existing.clone()]).unwrap().reason,
        MatchReason::ExactSourceId
    );

    let mut other = CandidateRecord::new("Zenith Gutters", Trade::Roofing, LeadSource::GoogleMaps);
    other.source_id = Some("abc".into());
    assert!(engine.find_match(&other, &[existing]).is_none());
}

#[test]
fn legal_suffix_and_apostrophe_do_not_hide_a_name_match() {
    let existing = stored("Joes Plumbing", LeadSource::GoogleMaps);
    let cand = CandidateRecord::new("Joe's Plumbing LLC", Trade::Plumbing, LeadSource::Yelp);
    let m = DeduplicationEngine::new().find_match(&cand, &[existing]).unwrap();
    assert_eq!(m.reason, MatchReason::FuzzyName);
    assert!(m.confidence >= 0.7, "confidence {}", m.confidence);
}

#[test]
fn unrelated_businesses_do_not_match() {
    let existing = stored("Acme Roofing", LeadSource::GoogleMaps);
    let cand = CandidateRecord::new("Zenith Electric", Trade::Electrical, LeadSource::Yelp);
    let engine = DeduplicationEngine::new();
    assert!(engine.find_match(&cand, &[existing.clone()]).is_none());
    assert_eq!(engine.decide(&cand, &[existing]), DedupDecision::New);
}

#[test]
fn nothing_to_compare_against_is_new() {
    let cand = CandidateRecord::new("Acme Roofing", Trade::Roofing, LeadSource::Yelp);
    assert_eq!(DeduplicationEngine::new().decide(&cand, &[]), DedupDecision::New);
}

#[test]
fn records_marked_duplicate_are_not_match_targets() {
    let mut dup = stored("Acme Roofing", LeadSource::GoogleMaps);
    dup.status = LeadStatus::Duplicate;
    let cand = CandidateRecord::new("Acme Roofing", Trade::Roofing, LeadSource::Yelp);
    assert!(DeduplicationEngine::new().find_match(&cand, &[dup]).is_none());
}

#[test]
fn stricter_threshold_rejects_near_names() {
    let existing = stored("Acme Plumbing and Heating", LeadSource::GoogleMaps);
    let cand = CandidateRecord::new("Acme Plumbing", Trade::Plumbing, LeadSource::Yelp);
    assert!(DeduplicationEngine::with_threshold(0.99).find_match(&cand, &[existing]).is_none());
}

#[test]
fn merging_the_same_candidate_twice_changes_nothing_more() {
    let existing = stored("Joes Plumbing", LeadSource::GoogleMaps);
    let mut cand = CandidateRecord::new("Joe's Plumbing", Trade::Plumbing, LeadSource::Yelp);
    cand.email = Some("office@joesplumbing.com".into());
    cand.source_id = Some("y-7".into());

    let once = merge_candidate(&existing, &cand);
    let twice = merge_candidate(&once, &cand);
    assert_eq!(once, twice);
    assert_eq!(once.id, existing.id);
    assert_eq!(once.record.email.as_deref(), Some("office@joesplumbing.com"));
}

#[test]
fn foreign_source_id_is_tagged_not_copied() {
    let mut seed = CandidateRecord::new("Hudson Valley Roofing", Trade::Roofing, LeadSource::Manual);
    seed.phone = Some("914-555-0142".into());
    let existing = StoredRecord::from_candidate(seed);

    let mut from_yelp = CandidateRecord::new("Hudson Valley Roofing", Trade::Roofing, LeadSource::Yelp);
    from_yelp.source_id = Some("y1".into());
    from_yelp.source_url = Some("https://www.yelp.com/biz/y1".into());
    let engine = DeduplicationEngine::new();
    let merged = match engine.decide(&from_yelp, &[existing.clone()]) {
        DedupDecision::Merge { merged, .. } => merged,
        other => panic!("expected a merge, got {other:?}"),
    };
    assert_eq!(merged.record.source, LeadSource::Manual);
    assert_eq!(merged.record.source_id, None);
    assert_eq!(merged.record.source_url, None);
    assert_eq!(merged.metadata.merged_from, vec!["yelp:y1".to_string()]);

    // Renamed listing, same Yelp id: still the same business.
    let mut renamed = CandidateRecord::new("HV Roof Pros", Trade::Roofing, LeadSource::Yelp);
    renamed.source_id = Some("y1".into());
    let m = engine.find_match(&renamed, &[merged.clone()]).unwrap();
    assert_eq!(m.reason, MatchReason::ExactSourceId);
    assert_eq!(m.matched.id, existing.id);

    let mut google = CandidateRecord::new("HV Roof Pros", Trade::Roofing, LeadSource::GoogleMaps);
    google.source_id = Some("y1".into());
    assert!(engine.find_match(&google, &[merged]).is_none());
}
