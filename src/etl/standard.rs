//! The pipeline every job runs: search extraction, record transformers and a sink.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::processor::ETLPipeline;
use super::types::{PipelineError, Readiness, RunSummary};
use crate::bucket::BucketStats;
use crate::extract::{
    ExtractOptions, ExtractionError, ExtractionSummary, PaginatedExtractor, QueryModel, Record,
    Source,
};
use crate::sink::Sink;
use crate::transform::{Transformer, TransformerChain};

type ExtractionHandle = JoinHandle<Result<ExtractionSummary, ExtractionError>>;

/// What one job extracts.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub collection: String,
    pub query: QueryModel,
    pub options: ExtractOptions,
    /// Missing collection is an error instead of an empty, skipped run.
    pub fail_on_missing: bool,
}

pub struct StandardPipeline {
    name: String,
    job: ExtractionJob,
    extractor: PaginatedExtractor<dyn Source>,
    transformer: TransformerChain,
    sink: Arc<dyn Sink>,
    channel_capacity: usize,
    extraction: Mutex<Option<ExtractionHandle>>,
}

impl StandardPipeline {
    pub fn new(
        name: impl Into<String>,
        job: ExtractionJob,
        source: Arc<dyn Source>,
        transformer: TransformerChain,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            name: name.into(),
            job,
            extractor: PaginatedExtractor::new(source),
            transformer,
            sink,
            channel_capacity: 1024,
            extraction: Mutex::new(None),
        }
    }

    /// Records buffered between extraction and the load workers.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job(&self) -> &ExtractionJob {
        &self.job
    }

    async fn join_extraction(&self) -> Option<Result<ExtractionSummary, PipelineError>> {
        let handle = self.extraction.lock().await.take()?;
        Some(match handle.await {
            Ok(result) => result.map_err(PipelineError::from),
            Err(e) => Err(PipelineError::WorkerPool(format!("extraction task failed: {e}"))),
        })
    }
}

#[async_trait]
impl ETLPipeline<Record, Record> for StandardPipeline {
    async fn pre_process(&self, _cancel: &CancellationToken) -> Result<Readiness, PipelineError> {
        let collection = &self.job.collection;
        if self.extractor.source().check_exists(collection).await? {
            return Ok(Readiness::Proceed);
        }
        if self.job.fail_on_missing {
            return Err(PipelineError::MissingSource(collection.clone()));
        }
        warn!(collection = %collection, "collection does not exist, skipping");
        Ok(Readiness::Halt(RunSummary::skipped(
            &self.name,
            collection,
            format!("collection '{collection}' does not exist"),
        )))
    }

    async fn extract(&self, cancel: &CancellationToken) -> Result<mpsc::Receiver<Record>, PipelineError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let extractor = self.extractor.clone();
        let job = self.job.clone();
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            extractor
                .extract_into(&job.query, &job.collection, &job.options, &cancel, tx)
                .await
        });

        let mut slot = self.extraction.lock().await;
        if slot.replace(handle).is_some() {
            warn!(pipeline = %self.name, "extraction restarted while a previous one was running");
        }
        Ok(rx)
    }

    async fn transform(&self, _cancel: &CancellationToken, item: Record) -> Result<Record, PipelineError> {
        Ok(self.transformer.transform(item)?)
    }

    async fn load(&self, _cancel: &CancellationToken, items: Vec<Record>) -> Result<(), PipelineError> {
        self.sink.store(items).await?;
        Ok(())
    }

    async fn post_process(
        &self,
        _cancel: &CancellationToken,
        stats: BucketStats,
    ) -> Result<RunSummary, PipelineError> {
        let extraction = match self.join_extraction().await {
            Some(result) => result?,
            None => {
                return Err(PipelineError::WorkerPool(
                    "post-processing without a running extraction".to_string(),
                ))
            }
        };
        for warning in &extraction.warnings {
            warn!(pipeline = %self.name, "{warning}");
        }

        let load = self.sink.load().await?;
        info!(
            pipeline = %self.name,
            pages = extraction.page_count,
            records = load.records,
            target = %load.target,
            "pipeline completed"
        );
        Ok(RunSummary::completed(&self.name, extraction, load, stats))
    }

    /// Waits for the extraction so its cursor is released, and reports the
    /// extraction's own error when the run was cancelled.
    async fn abort(&self, _cancel: &CancellationToken, error: PipelineError) -> PipelineError {
        match self.join_extraction().await {
            Some(Err(extraction)) if error.is_cancelled() => extraction,
            Some(Err(extraction)) => {
                warn!(pipeline = %self.name, "extraction also stopped: {extraction}");
                error
            }
            _ => error,
        }
    }
}
