use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn config(batch_size: usize, timeout: Option<Duration>, worker_num: usize) -> Arc<Config> {
    Arc::new(
        ConfigBuilder::default()
            .batch_size(batch_size)
            .timeout(timeout)
            .worker_num(worker_num)
            .build()
            .unwrap(),
    )
}

struct CollectingProcessor {
    items: Arc<tokio::sync::Mutex<Vec<i32>>>,
}

#[async_trait]
impl Processor<i32> for CollectingProcessor {
    async fn process(&self, _cancel: &CancellationToken, items: Vec<i32>) -> Result<(), BucketError> {
        self.items.lock().await.extend(items);
        Ok(())
    }
}

struct BatchSizeTracker {
    sizes: Arc<tokio::sync::Mutex<Vec<usize>>>,
}

#[async_trait]
impl Processor<i32> for BatchSizeTracker {
    async fn process(&self, _cancel: &CancellationToken, items: Vec<i32>) -> Result<(), BucketError> {
        self.sizes.lock().await.push(items.len());
        Ok(())
    }
}

struct FailingProcessor;

#[async_trait]
impl Processor<i32> for FailingProcessor {
    async fn process(&self, _cancel: &CancellationToken, _items: Vec<i32>) -> Result<(), BucketError> {
        Err(BucketError::processor(std::io::Error::new(
            std::io::ErrorKind::Other,
            "sink unavailable",
        )))
    }
}

fn counting(counter: &Arc<AtomicUsize>) -> impl Processor<i32> + 'static {
    let counter = Arc::clone(counter);
    move |_cancel: &CancellationToken, items: Vec<i32>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(items.len(), Ordering::SeqCst);
            Ok::<(), BucketError>(())
        }
    }
}

#[test]
fn test_config_validation() {
    let cfg = ConfigBuilder::default().build().unwrap();
    assert_eq!(cfg.batch_size(), 1);
    assert_eq!(cfg.worker_num(), 1);
    assert_eq!(cfg.timeout(), Some(Duration::from_secs(5)));

    assert!(ConfigBuilder::default().batch_size(0usize).build().is_err());
    assert!(ConfigBuilder::default().worker_num(0usize).build().is_err());
    assert!(ConfigBuilder::default()
        .timeout(Some(Duration::ZERO))
        .build()
        .is_err());
}

#[tokio::test]
async fn test_processes_every_item() {
    const ITEMS: usize = 100;
    let bucket: Bucket<i32> = Bucket::new(config(4, Some(Duration::from_millis(100)), 4));
    let producer = bucket.clone();
    let cancel = CancellationToken::new();

    let collected = Arc::new(tokio::sync::Mutex::new(Vec::with_capacity(ITEMS)));
    let processor = CollectingProcessor {
        items: Arc::clone(&collected),
    };

    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        for i in 0..ITEMS {
            producer.consume(&producer_cancel, i as i32).await.unwrap();
        }
        producer.close();
    });

    let stats = bucket.run(&cancel, processor).await.unwrap();
    assert_eq!(stats.items, ITEMS);

    let mut items = collected.lock().await.clone();
    items.sort();
    assert_eq!(items, (0..ITEMS as i32).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_flushes_full_batches() {
    let bucket: Bucket<i32> = Bucket::new(config(3, None, 1));
    let producer = bucket.clone();
    let cancel = CancellationToken::new();

    let sizes = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let processor = BatchSizeTracker {
        sizes: Arc::clone(&sizes),
    };

    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        for i in 0..7 {
            producer.consume(&producer_cancel, i).await.unwrap();
        }
        producer.close();
    });

    let stats = bucket.run(&cancel, processor).await.unwrap();
    assert_eq!(*sizes.lock().await, vec![3, 3, 1]);
    assert_eq!(stats, BucketStats { batches: 3, items: 7 });
}

#[tokio::test]
async fn test_timeout_flushes_partial_batch() {
    let bucket: Bucket<i32> = Bucket::new(config(100, Some(Duration::from_millis(20)), 1));
    let producer = bucket.clone();
    let cancel = CancellationToken::new();

    let processed = Arc::new(AtomicUsize::new(0));
    let seen_before_close = Arc::new(AtomicUsize::new(0));

    let producer_cancel = cancel.clone();
    let counter = Arc::clone(&processed);
    let seen = Arc::clone(&seen_before_close);
    tokio::spawn(async move {
        producer.consume(&producer_cancel, 1).await.unwrap();
        producer.consume(&producer_cancel, 2).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        seen.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
        producer.close();
    });

    bucket.run(&cancel, counting(&processed)).await.unwrap();

    assert_eq!(seen_before_close.load(Ordering::SeqCst), 2);
    assert_eq!(processed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_flushes_queued_items() {
    let bucket: Bucket<i32> = Bucket::new(config(10, None, 1));
    let cancel = CancellationToken::new();

    for i in 0..5 {
        bucket.consume(&cancel, i).await.unwrap();
    }
    cancel.cancel();

    let processed = Arc::new(AtomicUsize::new(0));
    let stats = bucket.run(&cancel, counting(&processed)).await.unwrap();

    assert_eq!(processed.load(Ordering::SeqCst), 5);
    assert_eq!(stats.batches, 1);
    assert!(matches!(
        bucket.consume(&cancel, 6).await,
        Err(BucketError::Cancelled)
    ));
}

#[tokio::test]
async fn test_worker_failure_halts_producer() {
    let bucket: Bucket<i32> = Bucket::new(config(2, None, 1));
    let producer = bucket.clone();
    let cancel = CancellationToken::new();

    let producer_cancel = cancel.clone();
    let produced = tokio::spawn(async move {
        for i in 0..100 {
            if let Err(e) = producer.consume(&producer_cancel, i).await {
                return Some(e);
            }
        }
        None
    });

    let err = bucket.run(&cancel, FailingProcessor).await.unwrap_err();
    assert_eq!(err.to_string(), "processor failed: sink unavailable");
    assert!(bucket.is_halted());

    let producer_err = produced.await.unwrap();
    assert!(matches!(producer_err, Some(BucketError::ConsumerError(_))));
}

#[tokio::test]
async fn test_multiple_workers() {
    let bucket: Bucket<i32> = Bucket::new(config(2, Some(Duration::from_millis(50)), 3));
    let producer = bucket.clone();
    let cancel = CancellationToken::new();

    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        for i in 0..20 {
            producer.consume(&producer_cancel, i).await.unwrap();
        }
        producer.close();
    });

    let processed = Arc::new(AtomicUsize::new(0));
    let stats = bucket.run(&cancel, counting(&processed)).await.unwrap();

    assert_eq!(processed.load(Ordering::SeqCst), 20);
    assert_eq!(stats.items, 20);
}

#[tokio::test]
async fn test_idle_cancellation() {
    let bucket: Bucket<i32> = Bucket::new(config(10, Some(Duration::from_secs(10)), 1));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let stats = bucket.run(&cancel, FailingProcessor).await.unwrap();
    assert_eq!(stats, BucketStats::default());
}
