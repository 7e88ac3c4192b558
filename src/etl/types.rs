use serde::Serialize;
use thiserror::Error;

use crate::bucket::{BucketError, BucketStats};
use crate::config::ConfigError;
use crate::extract::{ExtractionError, ExtractionSummary, SourceError};
use crate::sink::{LoadSummary, SinkError};
use crate::transform::TransformError;

/// Errors raised while running pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("bucket operation failed: {0}")]
    Bucket(BucketError),

    #[error("collection '{0}' does not exist")]
    MissingSource(String),

    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("cancellation requested")]
    Cancelled,

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("pipeline '{name}' failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl From<BucketError> for PipelineError {
    /// Unwraps pipeline errors that travelled through a bucket worker.
    fn from(error: BucketError) -> Self {
        match error {
            BucketError::ProcessorError(inner) => match inner.downcast::<PipelineError>() {
                Ok(pipeline) => *pipeline,
                Err(other) => PipelineError::Bucket(BucketError::ProcessorError(other)),
            },
            other => PipelineError::Bucket(other),
        }
    }
}

impl PipelineError {
    pub fn execution(name: impl Into<String>, source: PipelineError) -> Self {
        PipelineError::Execution {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            PipelineError::Cancelled => true,
            PipelineError::Extraction(e) => {
                e.kind() == crate::extract::ExtractionErrorKind::Cancelled
            }
            PipelineError::Execution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Whether a pipeline should go past its pre-processing step.
#[derive(Debug)]
pub enum Readiness {
    Proceed,
    /// Stop without extracting and report this summary.
    Halt(RunSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Skipped,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub collection: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadSummary>,
    pub batches: usize,
    pub records_loaded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunSummary {
    pub fn completed(
        pipeline: impl Into<String>,
        extraction: ExtractionSummary,
        load: LoadSummary,
        stats: BucketStats,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            collection: extraction.collection.clone(),
            status: RunStatus::Completed,
            extraction: Some(extraction),
            load: Some(load),
            batches: stats.batches,
            records_loaded: stats.items,
            message: None,
        }
    }

    pub fn skipped(
        pipeline: impl Into<String>,
        collection: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            collection: collection.into(),
            status: RunStatus::Skipped,
            extraction: None,
            load: None,
            batches: 0,
            records_loaded: 0,
            message: Some(message.into()),
        }
    }
}
