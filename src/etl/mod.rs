//! Pipeline lifecycle, the standard search-to-sink pipeline and the manager
//! that runs several of them.

pub mod manager;
pub mod processor;
pub mod registry;
pub mod standard;
pub mod types;

pub use manager::{ETLPipelineAdapter, ETLPipelineManager, ETLRunner};
pub use processor::{ETLPipeline, ETL};
pub use registry::{Composition, PipelineRegistry, SinkKind, SourceKind, TransformerKind};
pub use standard::{ExtractionJob, StandardPipeline};
pub use types::{PipelineError, Readiness, RunStatus, RunSummary};

#[cfg(test)]
#[path = "standard_test.rs"]
mod standard_test;
