//! Load targets for transformed records.

pub mod json_lines;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::extract::Record;

pub use json_lines::JsonLinesSink;
pub use memory::MemorySink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink was already committed and accepts no more records.
    #[error("sink '{0}' is closed")]
    Closed(String),
}

/// What a sink committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub target: String,
    pub records: usize,
    pub batches: usize,
}

/// Destination of the load stage.
///
/// `store` stages one batch and may be called concurrently from several
/// workers. `load` commits everything staged so far and closes the sink.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError>;

    async fn load(&self) -> Result<LoadSummary, SinkError>;
}
