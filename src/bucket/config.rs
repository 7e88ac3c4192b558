use derive_builder::Builder;
use std::time::Duration;

/// Batching settings for a [`Bucket`](super::Bucket).
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct Config {
    /// Maximum number of items in a batch before processing
    #[builder(default = "1")]
    pub(crate) batch_size: usize,

    /// Maximum time a partial batch waits. `None` flushes only on size or close.
    #[builder(default = "Some(Duration::from_secs(5))")]
    pub(crate) timeout: Option<Duration>,

    /// Number of concurrent worker tasks
    #[builder(default = "1")]
    pub(crate) worker_num: usize,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.batch_size == Some(0) {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.worker_num == Some(0) {
            return Err("worker_num must be at least 1".to_string());
        }
        if let Some(Some(timeout)) = self.timeout {
            if timeout.is_zero() {
                return Err("timeout must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl Config {
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[inline]
    pub fn worker_num(&self) -> usize {
        self.worker_num
    }
}
