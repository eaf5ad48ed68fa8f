// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod dedup;
pub mod error;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod resilience;
pub mod storage;

// ---- Re-exports for stable public API ----
pub use crate::dedup::{DedupDecision, DeduplicationEngine, MatchReason, MatchResult};
pub use crate::error::{IngestError, Result};
pub use crate::ingest::{IngestQuery, IngestResult, IngestionCoordinator, ProgressEvent, ProgressStatus};
pub use crate::model::{CandidateRecord, LeadSource, LeadStatus, Location, StoredRecord, Trade};
pub use crate::registry::ResilienceRegistry;
pub use crate::storage::{LeadRepository, MemoryLeadRepository};
