// src/ingest/types.rs
use crate::error::Result;
use crate::model::{CandidateRecord, LeadSource, Location, Trade};

/// Used by integrations when the query location has no parts.
pub const DEFAULT_LOCATION: &str = "Westchester County, NY";

/// One (trade × location) query against one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub trade: Trade,
    pub location: Location,
    pub max_results: usize,
}

impl SourceQuery {
    /// Location as free text for upstream search, or `DEFAULT_LOCATION`.
    pub fn location_text(&self, include_postal_code: bool) -> String {
        let text = self.location.display(include_postal_code);
        if text.is_empty() {
            DEFAULT_LOCATION.to_string()
        } else {
            text
        }
    }
}

/// Where the next page of a search term starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Token(String),
    Offset(u32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<CandidateRecord>,
    /// `None` when the upstream has no further pages.
    pub next: Option<PageCursor>,
}

/// One upstream provider. Implementations fetch single pages; paging, limits
/// and suppression of repeats live in `CandidateStream`.
#[async_trait::async_trait]
pub trait SourceIntegration: Send + Sync {
    fn source(&self) -> LeadSource;

    /// Search terms (or category aliases) to run for a trade, in order.
    fn search_terms(&self, trade: Trade) -> Vec<String>;

    /// Page ceiling per search term.
    fn max_pages_per_term(&self) -> u32;

    /// Fails with a configuration error when credentials are missing.
    fn ensure_configured(&self) -> Result<()>;

    /// Fetch one page. `cursor` is `None` for the first page of a term.
    async fn fetch_page(&self, query: &SourceQuery, term: &str, cursor: Option<&PageCursor>) -> Result<Page>;

    /// Cheap probe call; `false` on any failure.
    async fn test_connection(&self) -> bool;
}
