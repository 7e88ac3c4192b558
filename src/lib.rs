//! # etl-runner
//!
//! Staged extract-transform-load runner whose extraction stage pages through
//! search backends with server-side cursors.
//!
//! ## Features
//!
//! - **Paginated extraction** with retry, cancellation and guaranteed cursor release
//! - **Concurrent batch loading** with configurable workers
//! - **Backpressure handling** via bounded channels
//! - **Pipeline registry** resolving compositions of source, transformers and sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etl_runner::extract::{ExtractOptions, PaginatedExtractor, QueryModel};
//! use etl_runner::source::MockSource;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let extractor = PaginatedExtractor::new(Arc::new(MockSource::sample(100, 10)));
//! let result = extractor
//!     .extract(&QueryModel::match_all(), "events", &ExtractOptions::default(), &CancellationToken::new())
//!     .await?;
//! assert_eq!(result.records().len(), 100);
//! ```
//!
//! ## Modules
//!
//! - [`extract`] - Query model, cursor pagination and retry
//! - [`source`] - Search backends
//! - [`transform`] - Record transformers
//! - [`sink`] - Raw storage targets
//! - [`bucket`] - Generic batching and concurrent processing
//! - [`etl`] - Pipeline lifecycle, registry and manager
//! - [`config`] - Run file and environment settings

pub mod bucket;
pub mod config;
pub mod etl;
pub mod extract;
pub mod sink;
pub mod source;
pub mod telemetry;
pub mod transform;
