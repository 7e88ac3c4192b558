use std::sync::Arc;

use derive_builder::Builder;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::processor::{ETLPipeline, ETL};
use super::types::{PipelineError, RunSummary};
use crate::bucket;

/// Configuration for ETL pipeline execution
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Maximum number of pipelines running at once
    #[builder(default = "4")]
    pub worker_num: usize,
}

impl Config {
    pub fn new(worker_num: usize) -> Self {
        Config {
            worker_num: worker_num.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { worker_num: 4 }
    }
}

#[async_trait::async_trait]
pub trait ETLRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        config: Arc<bucket::Config>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError>;
}

/// Runs independent pipelines concurrently, at most `worker_num` at a time.
pub struct ETLPipelineManager {
    etl_runners: Vec<Arc<dyn ETLRunner>>,
    cfg: Config,
    bucket_config: Arc<bucket::Config>,
}

impl ETLPipelineManager {
    pub fn new(cfg: &Config, bucket_config: Arc<bucket::Config>) -> Self {
        ETLPipelineManager {
            etl_runners: Vec::new(),
            cfg: cfg.clone(),
            bucket_config,
        }
    }

    /// Wraps a pipeline in an [`ETLPipelineAdapter`]. `config` sets its batch
    /// size and flush timeout; the worker count comes from the manager.
    pub fn add_pipeline<E, T>(
        &mut self,
        pipeline: Box<dyn ETLPipeline<E, T> + Send + Sync>,
        name: String,
        config: bucket::Config,
    ) where
        E: Send + 'static,
        T: Send + 'static,
    {
        let adapter = ETLPipelineAdapter::new(pipeline, name, config);
        self.etl_runners.push(Arc::new(adapter));
    }

    pub fn add_runner(&mut self, runner: Arc<dyn ETLRunner>) {
        self.etl_runners.push(runner);
    }

    pub fn runner_names(&self) -> Vec<&str> {
        self.etl_runners.iter().map(|runner| runner.name()).collect()
    }

    /// Runs every pipeline and returns their summaries in registration order.
    ///
    /// A failing pipeline does not stop the others. The first failure in
    /// registration order is returned once all of them have finished.
    pub async fn run_all(&self, cancel: &CancellationToken) -> Result<Vec<RunSummary>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.cfg.worker_num.max(1)));
        let mut handles = Vec::with_capacity(self.etl_runners.len());

        for runner in &self.etl_runners {
            let runner = Arc::clone(runner);
            let config = Arc::clone(&self.bucket_config);
            let cancel = cancel.clone();
            let sem = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                info!(pipeline = runner.name(), "pipeline started");
                runner.run(config, &cancel).await
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for (runner, handle) in self.etl_runners.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::WorkerPool(e.to_string())),
            };
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!(pipeline = runner.name(), "pipeline failed: {e}");
                    if first_error.is_none() {
                        first_error = Some(PipelineError::execution(runner.name(), e));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }
}

/// Adapter to make ETLPipeline<E, T> work with ETLRunner trait
pub struct ETLPipelineAdapter<E, T> {
    etl: ETL<E, T>,
    name: String,
    config: bucket::Config,
}

impl<E, T> ETLPipelineAdapter<E, T>
where
    E: Send + 'static,
    T: Send + 'static,
{
    pub fn new(
        pipeline: Box<dyn ETLPipeline<E, T> + Send + Sync>,
        name: String,
        config: bucket::Config,
    ) -> Self {
        ETLPipelineAdapter {
            etl: ETL::from_box(pipeline),
            name,
            config,
        }
    }
}

#[async_trait::async_trait]
impl<E, T> ETLRunner for ETLPipelineAdapter<E, T>
where
    E: Send + 'static,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        config: Arc<bucket::Config>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let bucket_config = bucket::ConfigBuilder::default()
            .batch_size(self.config.batch_size())
            .timeout(self.config.timeout())
            .worker_num(config.worker_num())
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        self.etl.run(Arc::new(bucket_config), cancel).await
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
