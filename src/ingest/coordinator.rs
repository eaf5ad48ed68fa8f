// src/ingest/coordinator.rs
//! Drives integrations across (source × trade), funnels candidates through
//! deduplication and reports rolling progress plus a final tally.

use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dedup::{DedupDecision, DeduplicationEngine};
use crate::error::{IngestError, Result};
use crate::ingest::ensure_metrics_described;
use crate::ingest::stream::CandidateStream;
use crate::ingest::types::{SourceIntegration, SourceQuery};
use crate::model::{CandidateRecord, LeadSource, Location, RecordPatch, Trade};
use crate::registry::ResilienceRegistry;
use crate::storage::LeadRepository;

pub const DEFAULT_MAX_RESULTS_PER_SOURCE: usize = 100;

pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS_PER_SOURCE
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestQuery {
    pub sources: Vec<LeadSource>,
    pub categories: Vec<Trade>,
    #[serde(default)]
    pub location: Location,
    #[serde(default = "default_max_results")]
    pub max_results_per_source: usize,
    #[serde(default)]
    pub skip_deduplication: bool,
    #[serde(skip)]
    pub on_progress: Option<ProgressSink>,
}

impl fmt::Debug for IngestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestQuery")
            .field("sources", &self.sources)
            .field("categories", &self.categories)
            .field("location", &self.location)
            .field("max_results_per_source", &self.max_results_per_source)
            .field("skip_deduplication", &self.skip_deduplication)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl IngestQuery {
    pub fn new(sources: Vec<LeadSource>, categories: Vec<Trade>, location: Location) -> Self {
        Self {
            sources,
            categories,
            location,
            max_results_per_source: DEFAULT_MAX_RESULTS_PER_SOURCE,
            skip_deduplication: false,
            on_progress: None,
        }
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results_per_source = max;
        self
    }

    pub fn skip_deduplication(mut self, skip: bool) -> Self {
        self.skip_deduplication = skip;
        self
    }

    pub fn on_progress(mut self, sink: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(sink));
        self
    }

    /// Rejects requests with no sources, no categories or an empty location.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(IngestError::InvalidRequest("at least one source is required".into()));
        }
        if self.categories.is_empty() {
            return Err(IngestError::InvalidRequest("at least one category is required".into()));
        }
        if self.location.is_empty() {
            return Err(IngestError::InvalidRequest("location has no parts".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Starting,
    Fetching,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub source: LeadSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<Trade>,
    pub status: ProgressStatus,
    pub found: usize,
    pub saved: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub found: usize,
    pub saved: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source: LeadSource,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub total_found: usize,
    pub total_saved: usize,
    pub total_duplicates: usize,
    pub by_source: BTreeMap<LeadSource, SourceCounts>,
    pub errors: Vec<SourceError>,
}

/// What happened to one accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Saved,
    Duplicate,
    Merged,
}

struct SourceRun {
    source: LeadSource,
    counts: SourceCounts,
    errors: Vec<String>,
}

pub struct IngestionCoordinator {
    repository: Arc<dyn LeadRepository>,
    integrations: HashMap<LeadSource, Arc<dyn SourceIntegration>>,
    registry: Arc<ResilienceRegistry>,
    engine: DeduplicationEngine,
    max_concurrency: usize,
}

impl IngestionCoordinator {
    pub fn new(
        repository: Arc<dyn LeadRepository>,
        integrations: HashMap<LeadSource, Arc<dyn SourceIntegration>>,
        registry: Arc<ResilienceRegistry>,
    ) -> Self {
        Self {
            repository,
            integrations,
            registry,
            engine: DeduplicationEngine::new(),
            max_concurrency: 1,
        }
    }

    pub fn with_engine(mut self, engine: DeduplicationEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Sources run one at a time unless this is raised.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// Sources with an integration whose credentials are present.
    pub fn available_sources(&self) -> Vec<LeadSource> {
        let mut out: Vec<LeadSource> = self
            .integrations
            .iter()
            .filter(|(_, i)| i.ensure_configured().is_ok())
            .map(|(s, _)| *s)
            .collect();
        out.sort();
        out
    }

    /// Probe every configured integration.
    pub async fn test_connections(&self) -> BTreeMap<LeadSource, bool> {
        let mut out = BTreeMap::new();
        for (source, integration) in &self.integrations {
            out.insert(*source, integration.test_connection().await);
        }
        out
    }

    /// Run one ingestion request.
    ///
    /// Only a malformed request is an `Err`. Failures of individual sources
    /// are reported in `IngestResult::errors` and do not stop the others.
    pub async fn run(&self, query: &IngestQuery) -> Result<IngestResult> {
        query.validate()?;
        ensure_metrics_described();

        let mut sources: Vec<LeadSource> = Vec::with_capacity(query.sources.len());
        for s in &query.sources {
            if !sources.contains(s) {
                sources.push(*s);
            }
        }
        info!(
            target: "ingest",
            sources = sources.len(),
            trades = query.categories.len(),
            location = %query.location.display(true),
            max_per_source = query.max_results_per_source,
            skip_dedup = query.skip_deduplication,
            "ingestion started"
        );

        let runs: Vec<SourceRun> = if self.max_concurrency <= 1 {
            let mut runs = Vec::with_capacity(sources.len());
            for source in sources {
                runs.push(self.run_source(source, query).await);
            }
            runs
        } else {
            stream::iter(sources.into_iter().map(|source| self.run_source(source, query)))
                .buffered(self.max_concurrency)
                .collect()
                .await
        };

        let mut result = IngestResult::default();
        for run in runs {
            result.total_found += run.counts.found;
            result.total_saved += run.counts.saved;
            result.total_duplicates += run.counts.duplicates;
            result.by_source.insert(run.source, run.counts);
            result.errors.extend(run.errors.into_iter().map(|error| SourceError {
                source: run.source,
                error,
            }));
        }

        gauge!("ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(
            target: "ingest",
            found = result.total_found,
            saved = result.total_saved,
            duplicates = result.total_duplicates,
            errors = result.errors.len(),
            "ingestion finished"
        );
        Ok(result)
    }

    async fn run_source(&self, source: LeadSource, query: &IngestQuery) -> SourceRun {
        let mut run = SourceRun {
            source,
            counts: SourceCounts::default(),
            errors: Vec::new(),
        };
        emit(query, &run, None, ProgressStatus::Starting, None);

        let Some(integration) = self.integrations.get(&source) else {
            let msg = format!("no integration for {source}");
            warn!(target: "ingest", source = %source, "{msg}");
            self.record_error(query, &mut run, None, msg);
            return run;
        };

        for &trade in &query.categories {
            let remaining = query.max_results_per_source.saturating_sub(run.counts.found);
            if remaining == 0 {
                debug!(target: "ingest", source = %source, "per-source ceiling reached");
                break;
            }
            emit(query, &run, Some(trade), ProgressStatus::Fetching, None);

            let source_query = SourceQuery {
                trade,
                location: query.location.clone(),
                max_results: remaining,
            };
            let mut stream = CandidateStream::new(integration.as_ref(), source_query);
            let fatal = loop {
                match stream.next().await {
                    Ok(Some(candidate)) => {
                        run.counts.found += 1;
                        counter!("ingest_found_total", "source" => source.config_key()).increment(1);
                        match self.accept(candidate, query.skip_deduplication).await {
                            Ok(Outcome::Saved) => {
                                run.counts.saved += 1;
                                counter!("ingest_saved_total", "source" => source.config_key()).increment(1);
                            }
                            Ok(outcome) => {
                                run.counts.duplicates += 1;
                                counter!("ingest_duplicates_total", "source" => source.config_key())
                                    .increment(1);
                                if outcome == Outcome::Merged {
                                    counter!("ingest_merged_total", "source" => source.config_key())
                                        .increment(1);
                                }
                            }
                            Err(e) => break Some(e),
                        }
                    }
                    Ok(None) => {
                        if let Some(e) = stream.take_error() {
                            self.record_error(query, &mut run, Some(trade), format!("{trade}: {e}"));
                        }
                        break None;
                    }
                    Err(e) => break Some(e),
                }
            };
            debug!(
                target: "ingest",
                source = %source,
                trade = %trade,
                yielded = stream.yielded(),
                pages = stream.pages_fetched(),
                invalid = stream.invalid(),
                "query finished"
            );
            if let Some(e) = fatal {
                warn!(target: "ingest", source = %source, trade = %trade, error = %e, "source aborted");
                self.record_error(query, &mut run, Some(trade), e.to_string());
                return run;
            }
        }

        info!(
            target: "ingest",
            source = %source,
            found = run.counts.found,
            saved = run.counts.saved,
            duplicates = run.counts.duplicates,
            "source complete"
        );
        emit(query, &run, None, ProgressStatus::Complete, None);
        run
    }

    fn record_error(&self, query: &IngestQuery, run: &mut SourceRun, trade: Option<Trade>, msg: String) {
        counter!("ingest_source_errors_total", "source" => run.source.config_key()).increment(1);
        emit(query, run, trade, ProgressStatus::Error, Some(msg.clone()));
        run.errors.push(msg);
    }

    /// Duplicate check and write as one critical section.
    async fn accept(&self, candidate: CandidateRecord, skip_dedup: bool) -> Result<Outcome> {
        let _gate = self.registry.write_gate().lock().await;
        if skip_dedup {
            self.repository.create_record(candidate).await?;
            return Ok(Outcome::Saved);
        }
        let existing = self.repository.find_active_records_matching(&candidate).await?;
        match self.engine.decide(&candidate, &existing) {
            DedupDecision::New => {
                let stored = self.repository.create_record(candidate).await?;
                debug!(target: "ingest", id = %stored.id, company = %stored.record.company_name, "saved");
                Ok(Outcome::Saved)
            }
            DedupDecision::Duplicate(result) => {
                let mut metadata = result.matched.metadata;
                metadata.scrape_attempts += 1;
                let patch = RecordPatch {
                    metadata: Some(metadata),
                    ..RecordPatch::default()
                };
                self.repository.update_record(&result.matched.id, patch).await?;
                Ok(Outcome::Duplicate)
            }
            DedupDecision::Merge { result, mut merged } => {
                merged.metadata.scrape_attempts += 1;
                let id = result.matched.id.clone();
                if !self.repository.update_record(&id, RecordPatch::from_merged(&merged)).await? {
                    warn!(target: "ingest", id = %id, "matched record vanished before merge");
                    return Ok(Outcome::Duplicate);
                }
                debug!(target: "ingest", id = %id, reason = ?result.reason, "merged into existing record");
                Ok(Outcome::Merged)
            }
        }
    }
}

fn emit(
    query: &IngestQuery,
    run: &SourceRun,
    trade: Option<Trade>,
    status: ProgressStatus,
    error: Option<String>,
) {
    let Some(sink) = &query.on_progress else {
        return;
    };
    sink(&ProgressEvent {
        source: run.source,
        trade,
        status,
        found: run.counts.found,
        saved: run.counts.saved,
        duplicates: run.counts.duplicates,
        error,
    });
}
