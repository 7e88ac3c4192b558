use async_trait::async_trait;
use derive_builder::Builder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::cursor::Cursor;
use super::query::{QueryModel, QuerySpec};
use super::result::{ExtractionResult, ExtractionSummary, ExtractionWarning};
use super::retry::{RetryFailure, RetryPolicy};
use super::source::{PageHints, Record, Source};
use super::types::{ExtractionError, ExtractionErrorKind};

/// Per-extraction knobs.
#[derive(Debug, Clone, Default, Builder)]
#[builder(setter(into))]
pub struct ExtractOptions {
    /// Page size hint. `None` or zero uses the backend default.
    #[builder(default)]
    pub(crate) batch_size: Option<usize>,

    /// Cursor keep-alive hint such as `"2m"`. `None` or zero uses the backend default.
    #[builder(default)]
    pub(crate) scroll: Option<String>,

    #[builder(default)]
    pub(crate) retry: RetryPolicy,
}

impl ExtractOptions {
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn scroll(&self) -> Option<&str> {
        self.scroll.as_deref()
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Walks a source's result set page by page until it runs dry.
///
/// Exactly one backend cursor is alive per extraction, and it is released
/// once on every way out: completion, failure and cancellation.
pub struct PaginatedExtractor<S: ?Sized> {
    source: Arc<S>,
}

impl<S: ?Sized> Clone for PaginatedExtractor<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

/// Receives each fetched page's records.
#[async_trait]
trait PageHandler: Send {
    /// Returns false when the consumer is gone or the extraction was cancelled.
    async fn accept(&mut self, records: Vec<Record>, cancel: &CancellationToken) -> bool;
}

struct Collect(Vec<Record>);

#[async_trait]
impl PageHandler for Collect {
    async fn accept(&mut self, records: Vec<Record>, _cancel: &CancellationToken) -> bool {
        self.0.extend(records);
        true
    }
}

struct Forward(mpsc::Sender<Record>);

#[async_trait]
impl PageHandler for Forward {
    async fn accept(&mut self, records: Vec<Record>, cancel: &CancellationToken) -> bool {
        for record in records {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                sent = self.0.send(record) => sent,
            };
            if sent.is_err() {
                return false;
            }
        }
        true
    }
}

/// Releases the backend cursor if the extraction future is dropped before
/// it could release it itself.
struct CursorGuard<S: Source + ?Sized + 'static> {
    cursor: Cursor,
    source: Arc<S>,
}

impl<S: Source + ?Sized + 'static> Drop for CursorGuard<S> {
    fn drop(&mut self) {
        let Some(token) = self.cursor.take_release_token() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(token = %token, "cursor abandoned without a runtime to release it");
            return;
        };
        let source = Arc::clone(&self.source);
        warn!(token = %token, "extraction dropped mid-flight, releasing cursor");
        runtime.spawn(async move {
            if let Err(e) = source.release(&token).await {
                warn!(token = %token, "failed to release abandoned cursor: {e}");
            }
        });
    }
}

/// Why the paging loop stopped early.
enum Stop {
    Failed(ExtractionError),
    Cancelled,
}

impl From<RetryFailure> for Stop {
    fn from(failure: RetryFailure) -> Self {
        match failure {
            RetryFailure::Failed { error, attempts } => {
                Stop::Failed(ExtractionError::from_source(error, attempts))
            }
            RetryFailure::Cancelled => Stop::Cancelled,
        }
    }
}

impl<S> PaginatedExtractor<S>
where
    S: Source + ?Sized + 'static,
{
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Extracts every matching record into memory.
    ///
    /// On failure the error carries whatever was collected before it.
    pub async fn extract(
        &self,
        query: &QueryModel,
        collection: &str,
        options: &ExtractOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mut handler = Collect(Vec::new());
        let outcome = self
            .drive(query, collection, options, cancel, &mut handler)
            .await;
        let records = handler.0;

        match outcome {
            Ok(summary) => Ok(ExtractionResult::new(records, summary)),
            Err((error, summary)) if !records.is_empty() => {
                Err(error.with_partial(ExtractionResult::new(records, summary)))
            }
            Err((error, _)) => Err(error),
        }
    }

    /// Extracts every matching record, handing each to `sender` as pages arrive.
    ///
    /// Dropping the receiver stops the extraction as a cancellation.
    pub async fn extract_into(
        &self,
        query: &QueryModel,
        collection: &str,
        options: &ExtractOptions,
        cancel: &CancellationToken,
        sender: mpsc::Sender<Record>,
    ) -> Result<ExtractionSummary, ExtractionError> {
        let mut handler = Forward(sender);
        self.drive(query, collection, options, cancel, &mut handler)
            .await
            .map_err(|(error, _)| error)
    }

    async fn drive<H: PageHandler>(
        &self,
        query: &QueryModel,
        collection: &str,
        options: &ExtractOptions,
        cancel: &CancellationToken,
        handler: &mut H,
    ) -> Result<ExtractionSummary, (ExtractionError, ExtractionSummary)> {
        let span = info_span!("extract", collection, source = self.source.name());

        async move {
            let spec = query.render();
            let mut guard = CursorGuard {
                cursor: Cursor::new(options.batch_size, options.scroll.as_deref()),
                source: Arc::clone(&self.source),
            };
            debug!(match_all = spec.is_match_all(), ?spec, "rendered query");

            let outcome = self
                .paginate(&spec, collection, options, cancel, &mut guard.cursor, handler)
                .await;
            let release_warning = self.release(&mut guard.cursor).await;
            let cursor = &guard.cursor;

            let mut summary = ExtractionSummary {
                page_count: cursor.page_count(),
                record_count: cursor.record_count(),
                source_query: query.clone(),
                collection: collection.to_string(),
                warnings: Vec::new(),
            };

            match outcome {
                Ok(()) => {
                    summary.warnings.extend(release_warning);
                    info!(
                        pages = summary.page_count,
                        records = summary.record_count,
                        "extraction completed"
                    );
                    Ok(summary)
                }
                Err(stop) => {
                    let error = match stop {
                        Stop::Failed(error) => error,
                        Stop::Cancelled => ExtractionError::cancelled(),
                    };
                    let error = error
                        .with_progress(cursor.page_count(), cursor.record_count())
                        .with_release_failure(release_warning.as_ref().map(ToString::to_string));
                    summary.warnings.extend(release_warning);
                    if error.kind() == ExtractionErrorKind::Cancelled {
                        warn!(records = error.records_obtained(), "extraction cancelled");
                    } else {
                        warn!(records = error.records_obtained(), "extraction failed: {error}");
                    }
                    Err((error, summary))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn paginate<H: PageHandler>(
        &self,
        spec: &QuerySpec,
        collection: &str,
        options: &ExtractOptions,
        cancel: &CancellationToken,
        cursor: &mut Cursor,
        handler: &mut H,
    ) -> Result<(), Stop> {
        let source = &*self.source;
        let hints = cursor.hints();
        let hints = &hints;

        let first = options
            .retry
            .run("search", cancel, move || source.search(collection, spec, hints))
            .await?;
        cursor.advance(&first);
        debug!(records = first.records.len(), "fetched first page");
        if !handler.accept(first.records, cancel).await {
            return Err(Stop::Cancelled);
        }

        while !cursor.is_expended() {
            if cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }

            let token = match cursor.token() {
                Some(token) => token.to_string(),
                None => {
                    return Err(Stop::Failed(ExtractionError::new(
                        ExtractionErrorKind::Backend,
                        "backend returned records without a continuation token",
                    )));
                }
            };
            let token = token.as_str();

            let page = options
                .retry
                .run("continue", cancel, move || source.continue_page(token, hints))
                .await?;
            cursor.advance(&page);
            debug!(
                page = cursor.page_count(),
                records = page.records.len(),
                "fetched page"
            );
            if !handler.accept(page.records, cancel).await {
                return Err(Stop::Cancelled);
            }
        }

        Ok(())
    }

    /// Attempts the backend teardown once. Failures become warnings.
    async fn release(&self, cursor: &mut Cursor) -> Option<ExtractionWarning> {
        let token = cursor.take_release_token()?;
        match self.source.release(&token).await {
            Ok(()) => {
                debug!(token = %token, "released cursor");
                None
            }
            Err(error) => {
                let warning = ExtractionWarning::CursorRelease {
                    token,
                    message: error.to_string(),
                };
                warn!("{warning}");
                Some(warning)
            }
        }
    }
}
