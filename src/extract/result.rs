use serde::Serialize;
use std::fmt;

use super::query::QueryModel;
use super::source::Record;

/// Non-fatal problem noticed while finishing an extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// The backend cursor could not be torn down. Records are still valid.
    CursorRelease { token: String, message: String },
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CursorRelease { token, message } => {
                write!(f, "failed to release cursor {token}: {message}")
            }
        }
    }
}

/// Every record an extraction produced, with where it came from.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    records: Vec<Record>,
    summary: ExtractionSummary,
}

impl ExtractionResult {
    pub(crate) fn new(records: Vec<Record>, summary: ExtractionSummary) -> Self {
        Self { records, summary }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of successful page fetches, including a terminating empty page.
    pub fn page_count(&self) -> usize {
        self.summary.page_count
    }

    pub fn source_query(&self) -> &QueryModel {
        &self.summary.source_query
    }

    pub fn collection(&self) -> &str {
        &self.summary.collection
    }

    pub fn warnings(&self) -> &[ExtractionWarning] {
        &self.summary.warnings
    }

    pub fn summary(&self) -> &ExtractionSummary {
        &self.summary
    }
}

/// Provenance of a streamed extraction whose records were handed off page by page.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub page_count: usize,
    pub record_count: usize,
    pub source_query: QueryModel,
    pub collection: String,
    pub warnings: Vec<ExtractionWarning>,
}
