//! Paginated extraction from search backends.
//!
//! [`QueryModel`] decides which clauses a query carries, [`PaginatedExtractor`]
//! drives a [`Source`] cursor to completion and [`RetryPolicy`] wraps every
//! page fetch.

pub mod cursor;
pub mod extractor;
pub mod query;
pub mod result;
pub mod retry;
pub mod source;
pub mod types;

pub use cursor::Cursor;
pub use extractor::{ExtractOptions, ExtractOptionsBuilder, PaginatedExtractor};
pub use query::{
    FilterClause, Projection, QueryModel, QueryModelBuilder, QueryModelBuilderError, QuerySpec,
    RangeClause, DEFAULT_TIME_FIELD,
};
pub use result::{ExtractionResult, ExtractionSummary, ExtractionWarning};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use source::{Page, PageHints, Record, Source, SourceError};
pub use types::{ExtractionError, ExtractionErrorKind};
