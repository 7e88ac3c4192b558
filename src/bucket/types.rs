use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during bucket processing.
#[derive(Debug, Error)]
pub enum BucketError {
    /// A processor failed. Keeps the underlying error as the source.
    #[error("processor failed: {0}")]
    ProcessorError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Processing was cancelled via the cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// An item could not be handed to the workers.
    #[error("consumer error: {0}")]
    ConsumerError(String),

    #[error("{} worker(s) failed", .0.len())]
    MultipleErrors(Vec<BucketError>),
}

impl BucketError {
    pub fn processor<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BucketError::ProcessorError(Box::new(error))
    }
}

/// What the workers of one bucket run got through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub batches: usize,
    pub items: usize,
}

impl std::ops::AddAssign for BucketStats {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.items += other.items;
    }
}
