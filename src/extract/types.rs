use std::fmt;

use super::query::QueryModelBuilderError;
use super::result::ExtractionResult;
use super::source::SourceError;

/// Category of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// Query inputs were malformed or the backend rejected the query.
    Configuration,
    Authorization,
    /// The collection does not exist.
    NotFound,
    /// Transient failures outlasted the retry policy.
    ExtractionFailed,
    /// The backend broke the paging contract.
    Backend,
    Cancelled,
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration error",
            Self::Authorization => "authorization error",
            Self::NotFound => "collection not found",
            Self::ExtractionFailed => "extraction failed",
            Self::Backend => "backend error",
            Self::Cancelled => "extraction cancelled",
        };
        f.write_str(name)
    }
}

/// Failed extraction.
///
/// `records_obtained` tells "nothing was read" apart from "N records were read
/// then it failed"; a partial run is never reported as success.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    kind: ExtractionErrorKind,
    message: String,
    records_obtained: usize,
    pages_fetched: usize,
    partial: Option<Box<ExtractionResult>>,
    release_failure: Option<String>,
    #[source]
    source: Option<SourceError>,
}

impl ExtractionError {
    pub(crate) fn new(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            records_obtained: 0,
            pages_fetched: 0,
            partial: None,
            release_failure: None,
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::Configuration, message)
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ExtractionErrorKind::Cancelled, "extraction was cancelled")
    }

    /// Classifies a source failure that ended the extraction.
    pub(crate) fn from_source(error: SourceError, attempts: u32) -> Self {
        let kind = match &error {
            SourceError::Timeout(_) | SourceError::Connection(_) | SourceError::Transient(_) => {
                ExtractionErrorKind::ExtractionFailed
            }
            SourceError::Authorization(_) => ExtractionErrorKind::Authorization,
            SourceError::MalformedQuery(_) => ExtractionErrorKind::Configuration,
            SourceError::NotFound(_) => ExtractionErrorKind::NotFound,
            SourceError::Protocol(_) => ExtractionErrorKind::Backend,
        };
        let message = if attempts > 1 {
            format!("{error} (after {attempts} attempts)")
        } else {
            error.to_string()
        };
        Self {
            source: Some(error),
            ..Self::new(kind, message)
        }
    }

    pub(crate) fn with_progress(mut self, pages_fetched: usize, records_obtained: usize) -> Self {
        self.pages_fetched = pages_fetched;
        self.records_obtained = records_obtained;
        self
    }

    pub(crate) fn with_partial(mut self, partial: ExtractionResult) -> Self {
        self.partial = Some(Box::new(partial));
        self
    }

    pub(crate) fn with_release_failure(mut self, message: Option<String>) -> Self {
        self.release_failure = message;
        self
    }

    pub fn kind(&self) -> ExtractionErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn records_obtained(&self) -> usize {
        self.records_obtained
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// True when some records were read before the failure.
    pub fn is_partial(&self) -> bool {
        self.records_obtained > 0
    }

    /// Records collected before the failure, for materialized extractions.
    pub fn partial(&self) -> Option<&ExtractionResult> {
        self.partial.as_deref()
    }

    /// Cursor release failure that happened while unwinding, if any.
    pub fn release_failure(&self) -> Option<&str> {
        self.release_failure.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.source.as_ref().is_some_and(SourceError::is_retryable)
    }
}

impl From<QueryModelBuilderError> for ExtractionError {
    fn from(error: QueryModelBuilderError) -> Self {
        Self::configuration(error.to_string())
    }
}
