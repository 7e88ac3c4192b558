use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bucket::{Config, ConfigBuilder};
use crate::etl::{ExtractionJob, PipelineError, RunStatus, StandardPipeline, ETL};
use crate::extract::{
    ExtractOptionsBuilder, ExtractionErrorKind, QueryModel, Record, RetryPolicyBuilder,
    SourceError,
};
use crate::sink::{JsonLinesSink, LoadSummary, MemorySink, Sink, SinkError};
use crate::source::MockSource;
use crate::transform::{NestedKey, TransformerChain};

fn load_config() -> Arc<Config> {
    Arc::new(
        ConfigBuilder::default()
            .batch_size(4usize)
            .timeout(Some(Duration::from_millis(20)))
            .worker_num(2usize)
            .build()
            .unwrap(),
    )
}

fn job(collection: &str, fail_on_missing: bool) -> ExtractionJob {
    ExtractionJob {
        collection: collection.to_string(),
        query: QueryModel::match_all(),
        options: ExtractOptionsBuilder::default()
            .batch_size(Some(5))
            .retry(
                RetryPolicyBuilder::default()
                    .max_attempts(2u32)
                    .initial_delay(Duration::from_millis(1))
                    .jitter(0.0)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
        fail_on_missing,
    }
}

fn pipeline(source: &Arc<MockSource>, sink: &Arc<MemorySink>, job: ExtractionJob) -> ETL<Record, Record> {
    let pipeline = StandardPipeline::new(
        format!("test:{}", job.collection),
        job,
        Arc::clone(source) as Arc<dyn crate::extract::Source>,
        TransformerChain::new().with(NestedKey::new(["_source"])),
        Arc::clone(sink) as Arc<dyn Sink>,
    )
    .with_channel_capacity(3);
    ETL::from_box(Box::new(pipeline))
}

#[tokio::test]
async fn test_extracts_transforms_and_loads() {
    let source = Arc::new(MockSource::sample(23, 5));
    let sink = Arc::new(MemorySink::default());
    let etl = pipeline(&source, &sink, job("events", false));

    let summary = etl.run(load_config(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.records_loaded, 23);
    let extraction = summary.extraction.as_ref().unwrap();
    assert_eq!(extraction.record_count, 23);
    assert_eq!(extraction.page_count, 6);
    assert_eq!(summary.load.as_ref().unwrap().records, 23);

    let mut ids: Vec<u64> = sink
        .records()
        .iter()
        .map(|record| record["id"].as_u64().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, (0..23).collect::<Vec<_>>());
    assert!(sink.records().iter().all(|record| !record.contains_key("_source")));
    assert_eq!(source.release_count(), 1);
    assert_eq!(source.last_hints().unwrap().page_size, Some(5));
}

#[tokio::test]
async fn test_missing_collection_is_skipped() {
    let source = Arc::new(MockSource::sample(5, 5).with_collections(["events"]));
    let sink = Arc::new(MemorySink::default());
    let etl = pipeline(&source, &sink, job("archive", false));

    let summary = etl.run(load_config(), &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Skipped);
    assert_eq!(summary.records_loaded, 0);
    assert_eq!(source.search_calls(), 0);
    assert!(!sink.is_loaded());
}

#[tokio::test]
async fn test_missing_collection_fails_when_required() {
    let source = Arc::new(MockSource::sample(5, 5).with_collections(["events"]));
    let sink = Arc::new(MemorySink::default());
    let etl = pipeline(&source, &sink, job("archive", true));

    let err = etl.run(load_config(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingSource(ref c) if c == "archive"));
    assert_eq!(source.search_calls(), 0);
}

#[tokio::test]
async fn test_extraction_failure_skips_commit() {
    let source = Arc::new(
        MockSource::sample(20, 5)
            .fail_page(2, SourceError::Transient("503".into()))
            .fail_page(2, SourceError::Transient("503".into())),
    );
    let sink = Arc::new(MemorySink::default());
    let etl = pipeline(&source, &sink, job("events", false));

    let err = etl.run(load_config(), &CancellationToken::new()).await.unwrap_err();

    match err {
        PipelineError::Extraction(e) => {
            assert_eq!(e.kind(), ExtractionErrorKind::ExtractionFailed);
            assert_eq!(e.records_obtained(), 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!sink.is_loaded());
    assert!(sink.records().is_empty());
    assert_eq!(source.release_count(), 1);
}

#[tokio::test]
async fn test_transform_failure_releases_cursor() {
    let source = Arc::new(MockSource::sample(40, 5));
    let sink = Arc::new(MemorySink::default());
    let pipeline = StandardPipeline::new(
        "test:events",
        job("events", false),
        Arc::clone(&source) as Arc<dyn crate::extract::Source>,
        TransformerChain::new().with(NestedKey::new(["payload"])),
        Arc::clone(&sink) as Arc<dyn Sink>,
    )
    .with_channel_capacity(2);
    let etl: ETL<Record, Record> = ETL::from_box(Box::new(pipeline));

    let err = etl.run(load_config(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Transform(_)));
    assert!(!sink.is_loaded());
    assert_eq!(source.release_count(), 1);
}

/// Cancels the run as soon as the first batch arrives.
struct CancellingSink {
    inner: MemorySink,
    cancel: CancellationToken,
}

#[async_trait]
impl Sink for CancellingSink {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn store(&self, records: Vec<Record>) -> Result<(), SinkError> {
        self.cancel.cancel();
        self.inner.store(records).await
    }

    async fn load(&self) -> Result<LoadSummary, SinkError> {
        self.inner.load().await
    }
}

#[tokio::test]
async fn test_cancellation_reports_progress_and_releases() {
    let source = Arc::new(MockSource::sample(500, 5));
    let cancel = CancellationToken::new();
    let sink = Arc::new(CancellingSink {
        inner: MemorySink::default(),
        cancel: cancel.clone(),
    });
    let pipeline = StandardPipeline::new(
        "test:events",
        job("events", false),
        Arc::clone(&source) as Arc<dyn crate::extract::Source>,
        TransformerChain::new(),
        Arc::clone(&sink) as Arc<dyn Sink>,
    )
    .with_channel_capacity(3);
    let etl: ETL<Record, Record> = ETL::from_box(Box::new(pipeline));

    let err = etl.run(load_config(), &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    match err {
        PipelineError::Extraction(e) => assert!(e.records_obtained() < 500),
        PipelineError::Cancelled => {}
        other => panic!("unexpected error: {other}"),
    }
    assert!(!sink.inner.is_loaded());
    assert_eq!(source.release_count(), 1);
}

#[tokio::test]
async fn test_json_lines_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let source = Arc::new(MockSource::sample(7, 3));
    let sink: Arc<dyn Sink> = Arc::new(JsonLinesSink::new(&path));
    let pipeline = StandardPipeline::new(
        "test:events",
        job("events", false),
        source as Arc<dyn crate::extract::Source>,
        TransformerChain::new().with(NestedKey::new(["_source"])),
        sink,
    );
    let etl: ETL<Record, Record> = ETL::from_box(Box::new(pipeline));

    let summary = etl.run(load_config(), &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.load.unwrap().target, path.display().to_string());

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 7);
    assert!(content.lines().all(|line| line.contains("\"status\"")));
}
