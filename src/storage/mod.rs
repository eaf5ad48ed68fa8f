// src/storage/mod.rs
//! Storage seam used by ingestion, plus an in-memory implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::dedup::merge_records;
use crate::error::{IngestError, Result};
use crate::model::{CandidateRecord, LeadSource, LeadStatus, RecordPatch, StoredRecord};

#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// Active records that may match `candidate`, oldest first.
    async fn find_active_records_matching(&self, candidate: &CandidateRecord) -> Result<Vec<StoredRecord>>;

    /// Persist a candidate as a new record with a fresh id.
    async fn create_record(&self, candidate: CandidateRecord) -> Result<StoredRecord>;

    /// Apply a partial update. `false` when no record has that id.
    async fn update_record(&self, id: &str, patch: RecordPatch) -> Result<bool>;

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>>;
}

/// Records kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryLeadRepository {
    records: RwLock<Vec<StoredRecord>>,
}

impl MemoryLeadRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records (e.g. from a previous run).
    pub fn with_records(records: Vec<StoredRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<StoredRecord> {
        self.records.read().clone()
    }

    pub fn count_by_status(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for r in self.records.read().iter() {
            *out.entry(format!("{:?}", r.status)).or_insert(0) += 1;
        }
        out
    }

    pub fn count_by_source(&self) -> BTreeMap<LeadSource, usize> {
        let mut out = BTreeMap::new();
        for r in self.records.read().iter() {
            *out.entry(r.record.source).or_insert(0) += 1;
        }
        out
    }

    pub fn count_with_status(&self, status: LeadStatus) -> usize {
        self.records.read().iter().filter(|r| r.status == status).count()
    }
}

#[async_trait]
impl LeadRepository for MemoryLeadRepository {
    async fn find_active_records_matching(&self, _candidate: &CandidateRecord) -> Result<Vec<StoredRecord>> {
        // Fuzzy name matching needs every active record, so no narrowing here.
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }

    async fn create_record(&self, candidate: CandidateRecord) -> Result<StoredRecord> {
        candidate.validate()?;
        let stored = StoredRecord::from_candidate(candidate);
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == stored.id) {
            return Err(IngestError::Storage(format!("duplicate id {}", stored.id)));
        }
        records.push(stored.clone());
        Ok(stored)
    }

    async fn update_record(&self, id: &str, patch: RecordPatch) -> Result<bool> {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                patch.apply(r);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records.read().iter().find(|r| r.id == id).cloned())
    }
}

/// Fold `duplicate_id` into `canonical_id`: the canonical record gains the
/// duplicate's missing fields and the duplicate is marked `Duplicate` with a
/// back-reference. Returns the updated canonical record.
pub async fn consolidate(repo: &dyn LeadRepository, canonical_id: &str, duplicate_id: &str) -> Result<StoredRecord> {
    if canonical_id == duplicate_id {
        return Err(IngestError::InvalidRequest("cannot merge a record into itself".into()));
    }
    let missing = |id: &str| IngestError::Storage(format!("record {id} not found"));
    let canonical = repo.get_record(canonical_id).await?.ok_or_else(|| missing(canonical_id))?;
    let duplicate = repo.get_record(duplicate_id).await?.ok_or_else(|| missing(duplicate_id))?;

    let merged = merge_records(&canonical, &duplicate);
    repo.update_record(canonical_id, RecordPatch::from_merged(&merged)).await?;
    repo.update_record(
        duplicate_id,
        RecordPatch {
            status: Some(LeadStatus::Duplicate),
            duplicate_of: Some(Some(canonical_id.to_string())),
            ..RecordPatch::default()
        },
    )
    .await?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trade;

    #[tokio::test]
    async fn create_update_and_count() {
        let repo = MemoryLeadRepository::new();
        let mut c = CandidateRecord::new("Acme Roofing", Trade::Roofing, LeadSource::Yelp);
        c.phone = Some("914 555 0199".into());
        let s = repo.create_record(c).await.unwrap();
        assert_eq!(s.normalized_phone.as_deref(), Some("+19145550199"));

        let patch = RecordPatch {
            status: Some(LeadStatus::Duplicate),
            ..RecordPatch::default()
        };
        assert!(repo.update_record(&s.id, patch).await.unwrap());
        assert!(!repo.update_record("missing", RecordPatch::default()).await.unwrap());

        let probe = CandidateRecord::new("x", Trade::Roofing, LeadSource::Yelp);
        assert!(repo.find_active_records_matching(&probe).await.unwrap().is_empty());
        assert_eq!(repo.count_with_status(LeadStatus::Duplicate), 1);
        assert_eq!(repo.count_by_source().get(&LeadSource::Yelp), Some(&1));
    }

    #[tokio::test]
    async fn invalid_candidate_is_rejected() {
        let repo = MemoryLeadRepository::new();
        let c = CandidateRecord::new("", Trade::Roofing, LeadSource::Yelp);
        assert!(repo.create_record(c).await.is_err());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn consolidate_folds_duplicate_into_canonical() {
        let repo = MemoryLeadRepository::new();
        let mut a = CandidateRecord::new("Joe's Plumbing", Trade::Plumbing, LeadSource::GoogleMaps);
        a.phone = Some("914-555-0100".into());
        let a = repo.create_record(a).await.unwrap();
        let mut b = CandidateRecord::new("Joes Plumbing", Trade::Plumbing, LeadSource::Yelp);
        b.website = Some("joesplumbing.com".into());
        let b = repo.create_record(b).await.unwrap();

        let merged = consolidate(&repo, &a.id, &b.id).await.unwrap();
        assert_eq!(merged.record.website.as_deref(), Some("joesplumbing.com"));

        let dup = repo.get_record(&b.id).await.unwrap().unwrap();
        assert_eq!(dup.status, LeadStatus::Duplicate);
        assert_eq!(dup.duplicate_of.as_deref(), Some(a.id.as_str()));
        let probe = CandidateRecord::new("x", Trade::Plumbing, LeadSource::Yelp);
        assert_eq!(repo.find_active_records_matching(&probe).await.unwrap().len(), 1);

        assert!(consolidate(&repo, &a.id, &a.id).await.is_err());
        assert!(consolidate(&repo, &a.id, "missing").await.is_err());
    }
}
