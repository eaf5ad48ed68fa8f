// src/ingest/mod.rs
pub mod config;
pub mod coordinator;
pub mod normalize;
pub mod providers;
pub mod stream;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use coordinator::{
    IngestQuery, IngestResult, IngestionCoordinator, ProgressEvent, ProgressStatus, SourceCounts, SourceError,
};
pub use stream::CandidateStream;
pub use types::{Page, PageCursor, SourceIntegration, SourceQuery};

/// One-time metrics registration (so series show up in the exposition).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_found_total", "Candidates yielded by integrations.");
        describe_counter!("ingest_saved_total", "Candidates persisted as new records.");
        describe_counter!(
            "ingest_duplicates_total",
            "Candidates matched to an existing record (merged or not)."
        );
        describe_counter!("ingest_merged_total", "Duplicates whose new fields were merged.");
        describe_counter!(
            "ingest_source_errors_total",
            "Per-source errors reported in an ingestion result."
        );
        describe_counter!("ingest_invalid_total", "Candidates dropped by validation.");
        describe_counter!("http_requests_total", "Outbound requests sent, by source.");
        describe_counter!("http_rate_limited_total", "Upstream 429 responses, by source.");
        describe_counter!("retry_attempts_total", "Retries scheduled after a failed attempt.");
        describe_counter!("circuit_rejections_total", "Calls rejected by an open circuit.");
        describe_counter!("proxy_removed_total", "Proxies dropped for a high failure rate.");
        describe_histogram!("ingest_page_fetch_ms", "Page fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Provider response parse time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when an ingestion run last finished.");
    });
}
