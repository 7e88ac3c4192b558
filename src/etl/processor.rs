use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{PipelineError, Readiness, RunSummary};
use crate::bucket::{Bucket, BucketError, BucketStats, Config};

/// Defines an ETL (Extract-Transform-Load) pipeline.
///
/// # Type Parameters
///
/// * `E` - Type of items extracted from the source
/// * `T` - Type of items after transformation
///
/// # Lifecycle
///
/// 1. `pre_process()` - Checks before extraction, may halt the run
/// 2. `extract()` - Produce items from source
/// 3. `transform()` - Convert each extracted item
/// 4. `load()` - Stage batches of transformed items
/// 5. `post_process()` - Commit and summarize once every batch is loaded
///
/// `abort()` replaces `post_process()` when the run fails or is cancelled.
#[async_trait]
pub trait ETLPipeline<E, T>
where
    E: Send,
{
    async fn pre_process(&self, cancel: &CancellationToken) -> Result<Readiness, PipelineError>;

    /// Starts extraction. The channel closes once the source is drained.
    async fn extract(&self, cancel: &CancellationToken) -> Result<Receiver<E>, PipelineError>;

    /// Called concurrently for items of the same batch.
    async fn transform(&self, cancel: &CancellationToken, item: E) -> Result<T, PipelineError>;

    /// Called once per batch after all of its transforms complete.
    async fn load(&self, cancel: &CancellationToken, items: Vec<T>) -> Result<(), PipelineError>;

    async fn post_process(
        &self,
        cancel: &CancellationToken,
        stats: BucketStats,
    ) -> Result<RunSummary, PipelineError>;

    /// Tears down after a failed run and returns the error to report.
    async fn abort(&self, _cancel: &CancellationToken, error: PipelineError) -> PipelineError {
        error
    }
}

/// Executor for ETL pipelines with concurrent batch processing.
///
/// Extracted items are fed into a [`Bucket`]; every batch is transformed
/// concurrently and loaded in one call.
pub struct ETL<E, T> {
    etl: Arc<dyn ETLPipeline<E, T> + Send + Sync>,
}

impl<E, T> ETL<E, T>
where
    E: Send + 'static,
    T: Send + 'static,
{
    pub fn new(etl: Arc<dyn ETLPipeline<E, T> + Send + Sync>) -> Self {
        ETL { etl }
    }

    pub fn from_box(etl: Box<dyn ETLPipeline<E, T> + Send + Sync>) -> Self {
        ETL {
            etl: Arc::from(etl),
        }
    }

    pub async fn run(
        &self,
        config: Arc<Config>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if let Readiness::Halt(summary) = self.etl.pre_process(cancel).await? {
            debug!(collection = %summary.collection, "pipeline halted before extraction");
            return Ok(summary);
        }

        // Stops extraction and workers on failure without touching the caller's token.
        let child = cancel.child_token();
        let bucket = Bucket::new(config);
        let process_handle = self.spawn_workers(&bucket, &child);

        let mut receiver = match self.etl.extract(&child).await {
            Ok(receiver) => receiver,
            Err(e) => {
                child.cancel();
                bucket.close();
                let _ = process_handle.await;
                return Err(self.etl.abort(cancel, e).await);
            }
        };

        let mut produce_error = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                _ = bucket.halted() => {
                    break;
                },
                item = receiver.recv() => {
                    match item {
                        Some(item) => {
                            if let Err(e) = bucket.consume(&child, item).await {
                                produce_error = Some(e);
                                break;
                            }
                        },
                        None => {
                            break;
                        },
                    }
                }
            }
        }

        // Signal bucket that no more items will be produced
        drop(receiver);
        bucket.close();

        let processed = match process_handle.await {
            Ok(result) => result.map_err(PipelineError::from),
            Err(e) => Err(PipelineError::WorkerPool(e.to_string())),
        };

        let stats = match processed {
            Ok(_) if cancel.is_cancelled() => Err(PipelineError::Cancelled),
            Ok(stats) => match produce_error {
                Some(e) => Err(PipelineError::from(e)),
                None => Ok(stats),
            },
            Err(e) => Err(e),
        };

        match stats {
            Ok(stats) => self.etl.post_process(cancel, stats).await,
            Err(e) => {
                child.cancel();
                warn!("pipeline run stopped: {e}");
                Err(self.etl.abort(cancel, e).await)
            }
        }
    }

    fn spawn_workers(
        &self,
        bucket: &Bucket<E>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<BucketStats, BucketError>> {
        let bucket = bucket.clone();
        let cancel = cancel.clone();
        let etl = Arc::clone(&self.etl);

        tokio::spawn(async move {
            bucket
                .run(&cancel, move |ctx: &CancellationToken, items: Vec<E>| {
                    let etl = Arc::clone(&etl);
                    let ctx = ctx.clone();

                    async move {
                        let concurrency =
                            std::cmp::min(items.len(), std::cmp::max(10, num_cpus::get() * 2))
                                .max(1);

                        let etl_ref = &etl;
                        let ctx_ref = &ctx;
                        let transformed: Vec<Result<T, PipelineError>> =
                            futures::stream::iter(items.into_iter().map(move |item| async move {
                                etl_ref.transform(ctx_ref, item).await
                            }))
                            .buffer_unordered(concurrency)
                            .collect()
                            .await;

                        let transformed = transformed
                            .into_iter()
                            .collect::<Result<Vec<T>, _>>()
                            .map_err(BucketError::processor)?;

                        etl.load(&ctx, transformed)
                            .await
                            .map_err(BucketError::processor)
                    }
                })
                .await
        })
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
