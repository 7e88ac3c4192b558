//! Size- and time-bounded batching over a pool of workers.

pub mod bucket;
pub mod config;
pub mod processor;
pub mod types;

pub use bucket::Bucket;
pub use config::{Config, ConfigBuilder, ConfigBuilderError};
pub use processor::Processor;
pub use types::{BucketError, BucketStats};

#[cfg(test)]
mod tests;
