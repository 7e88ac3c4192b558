//! Concrete [`Source`](crate::extract::Source) backends.

pub mod elasticsearch;
pub mod mock;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchSource};
pub use mock::MockSource;
