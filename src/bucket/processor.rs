use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::BucketError;

/// Handles one batch drained from a [`Bucket`](super::Bucket).
#[async_trait]
pub trait Processor<T>: Send + Sync {
    async fn process(&self, cancel: &CancellationToken, items: Vec<T>) -> Result<(), BucketError>;
}

#[async_trait]
impl<T, F, Fut> Processor<T> for F
where
    F: Fn(&CancellationToken, Vec<T>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), BucketError>> + Send,
    T: Send + 'static,
{
    async fn process(&self, cancel: &CancellationToken, items: Vec<T>) -> Result<(), BucketError> {
        self(cancel, items).await
    }
}
