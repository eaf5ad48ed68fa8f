// src/ingest/stream.rs
//! Lazy, page-at-a-time sequence of candidates for one query.
//!
//! The stream walks the integration's search terms in order and pages each
//! term until the upstream runs out, the per-term page ceiling is hit, or the
//! query's `max_results` is reached. The cap is checked before every fetch, so
//! no page is requested once enough records have been yielded.

use metrics::{counter, histogram};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::ingest::types::{PageCursor, SourceIntegration, SourceQuery};
use crate::model::CandidateRecord;

pub struct CandidateStream<'a> {
    integration: &'a dyn SourceIntegration,
    query: SourceQuery,
    terms: Vec<String>,
    term_idx: usize,
    cursor: Option<PageCursor>,
    pages_for_term: u32,
    term_exhausted: bool,
    buffer: VecDeque<CandidateRecord>,
    seen: HashSet<String>,
    yielded: usize,
    pages_fetched: u32,
    invalid: usize,
    configured: bool,
    finished: bool,
    error: Option<IngestError>,
}

impl<'a> CandidateStream<'a> {
    pub fn new(integration: &'a dyn SourceIntegration, query: SourceQuery) -> Self {
        let terms = integration.search_terms(query.trade);
        Self {
            integration,
            query,
            terms,
            term_idx: 0,
            cursor: None,
            pages_for_term: 0,
            term_exhausted: false,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            yielded: 0,
            pages_fetched: 0,
            invalid: 0,
            configured: false,
            finished: false,
            error: None,
        }
    }

    /// Next candidate, `Ok(None)` at the end of the sequence.
    ///
    /// Fatal errors (configuration) are returned. Any other failure ends the
    /// sequence and is kept for `take_error`.
    pub async fn next(&mut self) -> Result<Option<CandidateRecord>> {
        if !self.configured {
            self.integration.ensure_configured()?;
            self.configured = true;
        }
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.yielded >= self.query.max_results {
                debug!(
                    target: "ingest",
                    source = %self.integration.source(),
                    yielded = self.yielded,
                    "result cap reached"
                );
                self.finished = true;
                return Ok(None);
            }
            if let Some(rec) = self.buffer.pop_front() {
                if let Err(e) = rec.validate() {
                    warn!(
                        target: "ingest",
                        source = %rec.source,
                        company = %rec.company_name,
                        error = %e,
                        "dropping invalid candidate"
                    );
                    counter!("ingest_invalid_total").increment(1);
                    self.invalid += 1;
                    continue;
                }
                if let Some(id) = &rec.source_id {
                    if !self.seen.insert(id.clone()) {
                        debug!(target: "ingest", source_id = %id, "repeat within query, skipped");
                        continue;
                    }
                }
                self.yielded += 1;
                return Ok(Some(rec));
            }
            if !self.fetch_next_page().await? {
                self.finished = true;
            }
        }
    }

    /// The non-fatal error that ended the sequence early, if any.
    pub fn take_error(&mut self) -> Option<IngestError> {
        self.error.take()
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn invalid(&self) -> usize {
        self.invalid
    }

    /// Fetch one page into the buffer. `Ok(false)` when every term is done.
    async fn fetch_next_page(&mut self) -> Result<bool> {
        if self.term_exhausted {
            self.term_idx += 1;
            self.cursor = None;
            self.pages_for_term = 0;
            self.term_exhausted = false;
        }
        let Some(term) = self.terms.get(self.term_idx).cloned() else {
            return Ok(false);
        };

        let started = Instant::now();
        let fetched = self
            .integration
            .fetch_page(&self.query, &term, self.cursor.as_ref())
            .await;
        histogram!("ingest_page_fetch_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match fetched {
            Ok(page) => {
                self.pages_fetched += 1;
                self.pages_for_term += 1;
                debug!(
                    target: "ingest",
                    source = %self.integration.source(),
                    term = %term,
                    page = self.pages_for_term,
                    records = page.records.len(),
                    "page fetched"
                );
                self.cursor = page.next;
                if self.cursor.is_none()
                    || self.pages_for_term >= self.integration.max_pages_per_term()
                {
                    self.term_exhausted = true;
                }
                self.buffer.extend(page.records);
                Ok(true)
            }
            Err(e) if e.is_fatal() => {
                self.finished = true;
                Err(e)
            }
            Err(e) => {
                warn!(
                    target: "ingest",
                    source = %self.integration.source(),
                    trade = %self.query.trade,
                    term = %term,
                    error = %e,
                    "page fetch failed, ending query"
                );
                self.error = Some(e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Page;
    use crate::model::{LeadSource, Location, Trade};
    use parking_lot::Mutex;

    /// Two pages for one term, served from memory.
    struct TwoPages {
        calls: Mutex<u32>,
    }

    fn record(id: &str, name: &str) -> CandidateRecord {
        let mut c = CandidateRecord::new(name, Trade::Roofing, LeadSource::Yelp);
        c.source_id = Some(id.into());
        c
    }

    #[async_trait::async_trait]
    impl SourceIntegration for TwoPages {
        fn source(&self) -> LeadSource {
            LeadSource::Yelp
        }
        fn search_terms(&self, _trade: Trade) -> Vec<String> {
            vec!["roofing".into()]
        }
        fn max_pages_per_term(&self) -> u32 {
            5
        }
        fn ensure_configured(&self) -> Result<()> {
            Ok(())
        }
        async fn fetch_page(&self, _q: &SourceQuery, _term: &str, cursor: Option<&PageCursor>) -> Result<Page> {
            *self.calls.lock() += 1;
            Ok(match cursor {
                None => Page {
                    records: vec![record("a", "Acme Roofing"), record("x", ""), record("b", "Zenith Roofing")],
                    next: Some(PageCursor::Offset(3)),
                },
                Some(_) => Page {
                    records: vec![record("a", "Acme Roofing"), record("c", "Summit Roofing")],
                    next: None,
                },
            })
        }
        async fn test_connection(&self) -> bool {
            true
        }
    }

    fn query(max_results: usize) -> SourceQuery {
        SourceQuery {
            trade: Trade::Roofing,
            location: Location::default(),
            max_results,
        }
    }

    #[tokio::test]
    async fn drops_invalid_and_repeated_records() {
        let integration = TwoPages { calls: Mutex::new(0) };
        let mut stream = CandidateStream::new(&integration, query(10));
        let mut ids = Vec::new();
        while let Some(rec) = stream.next().await.unwrap() {
            ids.push(rec.source_id.unwrap());
        }
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(stream.pages_fetched(), 2);
        assert_eq!(stream.invalid(), 1);
        assert_eq!(stream.yielded(), 3);
        assert!(stream.take_error().is_none());
    }

    #[tokio::test]
    async fn cap_stops_before_the_next_fetch() {
        let integration = TwoPages { calls: Mutex::new(0) };
        let mut stream = CandidateStream::new(&integration, query(2));
        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(stream.pages_fetched(), 1);
        assert_eq!(*integration.calls.lock(), 1);
    }
}
