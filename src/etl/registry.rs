//! Pipeline ids mapped to stage compositions.
//!
//! The registry is resolved once at startup. A run names a pipeline id (or
//! none for the default composition) and every job of the run is assembled
//! from that composition.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::manager::{Config as ManagerConfig, ETLPipelineManager};
use super::standard::{ExtractionJob, StandardPipeline};
use super::types::PipelineError;
use crate::bucket;
use crate::config::{JobConfig, RunFile, Settings};
use crate::extract::{Record, Source};
use crate::sink::{JsonLinesSink, MemorySink, Sink};
use crate::source::elasticsearch::ElasticsearchSource;
use crate::source::MockSource;
use crate::transform::{NestedKey, Passthrough, TransformerChain};

/// Hits served per job by the in-memory source.
pub const MOCK_RECORDS: usize = 25;

const DEFAULT_NESTED_KEY: &str = "_source";
const LOAD_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Elasticsearch,
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    JsonLines,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerKind {
    Passthrough,
    /// Uses the job's `nested_key`, or `_source` when the job sets none.
    NestedKey,
}

/// Which implementation backs each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub source: SourceKind,
    pub transformers: Vec<TransformerKind>,
    pub sink: SinkKind,
}

impl Default for Composition {
    fn default() -> Self {
        Self {
            source: SourceKind::Elasticsearch,
            transformers: vec![TransformerKind::NestedKey],
            sink: SinkKind::JsonLines,
        }
    }
}

impl Composition {
    /// Same transformers, in-memory source and sink.
    pub fn mocked(&self) -> Self {
        Self {
            source: SourceKind::Mock,
            transformers: self.transformers.clone(),
            sink: SinkKind::Memory,
        }
    }

    fn transformer_for(&self, job: &JobConfig) -> TransformerChain {
        let mut chain = TransformerChain::new();
        for kind in &self.transformers {
            match kind {
                TransformerKind::Passthrough => chain.push(Arc::new(Passthrough)),
                TransformerKind::NestedKey => {
                    let path = job
                        .nested_key
                        .clone()
                        .unwrap_or_else(|| vec![DEFAULT_NESTED_KEY.to_string()]);
                    chain.push(Arc::new(NestedKey::new(path)));
                }
            }
        }
        chain
    }

    fn sink_for(&self, job: &JobConfig, settings: &Settings) -> Arc<dyn Sink> {
        match self.sink {
            SinkKind::JsonLines => Arc::new(JsonLinesSink::new(job.output_path(settings))),
            SinkKind::Memory => Arc::new(MemorySink::new(format!("memory:{}", job.index))),
        }
    }
}

pub struct PipelineRegistry {
    default: Composition,
    overrides: BTreeMap<String, Composition>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new(Composition::default())
    }
}

impl PipelineRegistry {
    pub fn new(default: Composition) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// The default composition plus the built-in overrides.
    ///
    /// `raw` keeps whole search hits instead of descending into `_source`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            "raw",
            Composition {
                transformers: vec![TransformerKind::Passthrough],
                ..Composition::default()
            },
        );
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, composition: Composition) {
        self.overrides.insert(id.into(), composition);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    /// `None` and `"default"` resolve to the default composition.
    pub fn resolve(&self, id: Option<&str>) -> Result<&Composition, PipelineError> {
        match id {
            None | Some("default") => Ok(&self.default),
            Some(id) => self
                .overrides
                .get(id)
                .ok_or_else(|| PipelineError::UnknownPipeline(id.to_string())),
        }
    }

    /// Assembles one pipeline per job of `run` behind a manager.
    pub fn build_manager(
        &self,
        id: Option<&str>,
        run: &RunFile,
        settings: &Settings,
        use_mock: bool,
    ) -> Result<ETLPipelineManager, PipelineError> {
        let resolved = self.resolve(id)?;
        let composition = if use_mock {
            resolved.mocked()
        } else {
            resolved.clone()
        };
        let pipeline_id = id.unwrap_or("default");
        info!(pipeline = pipeline_id, mock = use_mock, jobs = run.jobs.len(), "building pipelines");

        let manager_config = ManagerConfig::new(run.worker_num.unwrap_or(settings.num_threads));
        let bucket_config = bucket::ConfigBuilder::default()
            .worker_num(settings.num_threads)
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        let mut manager = ETLPipelineManager::new(&manager_config, Arc::new(bucket_config));

        // One HTTP client serves every job. Mock sources keep per-cursor state, so
        // each job gets its own.
        let shared: Option<Arc<dyn Source>> = match composition.source {
            SourceKind::Elasticsearch => {
                let source = ElasticsearchSource::new(&settings.elasticsearch())?;
                Some(Arc::new(source) as Arc<dyn Source>)
            }
            SourceKind::Mock => None,
        };

        for job in &run.jobs {
            let source = match &shared {
                Some(source) => Arc::clone(source),
                None => mock_source(job, settings),
            };
            let pipeline = assemble(&composition, pipeline_id, job, settings, source)?;
            let load_config = bucket::ConfigBuilder::default()
                .batch_size(job.load_batch_size(settings))
                .timeout(Some(LOAD_FLUSH_INTERVAL))
                .build()
                .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

            debug!(pipeline = pipeline.name(), "registered job");
            let name = pipeline.name().to_string();
            manager.add_pipeline::<Record, Record>(Box::new(pipeline), name, load_config);
        }
        Ok(manager)
    }
}

fn mock_source(job: &JobConfig, settings: &Settings) -> Arc<dyn Source> {
    let page_size = job
        .batch_size
        .or(settings.default_batch_size)
        .filter(|size| *size > 0)
        .unwrap_or(10);
    Arc::new(MockSource::sample(MOCK_RECORDS, page_size).with_name(format!("mock-{}", job.index)))
}

/// Builds the pipeline for one job.
pub fn assemble(
    composition: &Composition,
    pipeline_id: &str,
    job: &JobConfig,
    settings: &Settings,
    source: Arc<dyn Source>,
) -> Result<StandardPipeline, PipelineError> {
    let extraction = ExtractionJob {
        collection: job.index.clone(),
        query: job.query_model()?,
        options: job.extract_options(settings)?,
        fail_on_missing: job.fail_on_missing,
    };
    let pipeline = StandardPipeline::new(
        format!("{pipeline_id}:{}", job.index),
        extraction,
        source,
        composition.transformer_for(job),
        composition.sink_for(job, settings),
    )
    .with_channel_capacity(job.load_batch_size(settings));
    Ok(pipeline)
}
