use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::query::QuerySpec;

/// A document returned by a source. Opaque to the extraction core.
pub type Record = Map<String, Value>;

/// One response from a paginated source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Continuation token to use for the next request, if the backend sent one.
    pub token: Option<String>,
    pub records: Vec<Record>,
    /// Backend says there is nothing after this page.
    pub exhausted: bool,
}

impl Page {
    pub fn new(token: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            token: Some(token.into()),
            records,
            exhausted: false,
        }
    }

    pub fn exhausted(mut self) -> Self {
        self.exhausted = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-extraction hints passed along with every page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageHints {
    /// `None` leaves the page size to the backend.
    pub page_size: Option<usize>,
    /// Cursor keep-alive, `None` leaves it to the backend.
    pub keep_alive: Option<String>,
}

/// Errors a source reports for a single call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    /// Server-side or throttling failure that may succeed later.
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("query rejected: {0}")]
    MalformedQuery(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend answered with something the client cannot interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Transient(_)
        )
    }
}

/// Capability the extraction core consumes from a search backend.
///
/// The core never knows how a source reaches its backend; an in-memory
/// implementation can stand in for a live engine.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Checks the collection exists before any cursor is opened.
    async fn check_exists(&self, _collection: &str) -> Result<bool, SourceError> {
        Ok(true)
    }

    /// Opens a cursor over `collection` and returns its first page.
    async fn search(
        &self,
        collection: &str,
        query: &QuerySpec,
        hints: &PageHints,
    ) -> Result<Page, SourceError>;

    /// Fetches the page following `token`. The query is not re-sent.
    async fn continue_page(&self, token: &str, hints: &PageHints) -> Result<Page, SourceError>;

    /// Tears down the backend-side cursor.
    async fn release(&self, token: &str) -> Result<(), SourceError>;
}
