// tests/metrics.rs
//! Installs the process-wide recorder, so it lives in its own test binary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use lead_ingest::error::Result;
use lead_ingest::ingest::{Page, PageCursor, SourceIntegration, SourceQuery};
use lead_ingest::metrics::Metrics;
use lead_ingest::{
    CandidateRecord, IngestQuery, IngestionCoordinator, LeadSource, Location, MemoryLeadRepository,
    ResilienceRegistry, Trade,
};

struct OnePage;

#[async_trait]
impl SourceIntegration for OnePage {
    fn source(&self) -> LeadSource {
        LeadSource::Yelp
    }

    fn search_terms(&self, _trade: Trade) -> Vec<String> {
        vec!["hvac".into()]
    }

    fn max_pages_per_term(&self) -> u32 {
        1
    }

    fn ensure_configured(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_page(&self, query: &SourceQuery, _term: &str, _cursor: Option<&PageCursor>) -> Result<Page> {
        let mut a = CandidateRecord::new("Acme Heating", query.trade, LeadSource::Yelp);
        a.phone = Some("914-555-0111".into());
        let mut b = CandidateRecord::new("Acme Heating & Air", query.trade, LeadSource::Yelp);
        b.phone = Some("914-555-0111".into());
        b.source_id = Some("dup".into());
        Ok(Page {
            records: vec![a, b],
            next: None,
        })
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn ingestion_series_are_exported() {
    let metrics = Metrics::init().unwrap();

    let mut integrations: HashMap<LeadSource, Arc<dyn SourceIntegration>> = HashMap::new();
    integrations.insert(LeadSource::Yelp, Arc::new(OnePage));
    let coord = IngestionCoordinator::new(
        Arc::new(MemoryLeadRepository::new()),
        integrations,
        Arc::new(ResilienceRegistry::default()),
    );
    let query = IngestQuery::new(
        vec![LeadSource::Yelp],
        vec![Trade::Hvac],
        Location {
            postal_code: Some("10701".into()),
            ..Location::default()
        },
    );
    let result = coord.run(&query).await.unwrap();
    assert_eq!((result.total_saved, result.total_duplicates), (1, 1));

    let text = metrics.render();
    for series in [
        "ingest_found_total",
        "ingest_saved_total",
        "ingest_duplicates_total",
        "ingest_last_run_ts",
        "ingest_page_fetch_ms",
    ] {
        assert!(text.contains(series), "missing {series} in:\n{text}");
    }
    assert!(text.contains(r#"source="yelp""#));

    // A second recorder cannot be installed.
    assert!(Metrics::init().is_err());
}
