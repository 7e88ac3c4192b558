use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::Config;
use super::processor::Processor;
use super::types::{BucketError, BucketStats};

/// Batches items and hands each batch to one of `worker_num` workers.
///
/// A batch is flushed when it reaches `batch_size`, when the timeout ticks
/// with items waiting, or when the bucket is closed. A failing worker halts
/// the others and the producer.
pub struct Bucket<T> {
    config: Arc<Config>,
    sender: mpsc::Sender<T>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    done: CancellationToken,
    halt: CancellationToken,
}

impl<T> Clone for Bucket<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            done: self.done.clone(),
            halt: self.halt.clone(),
        }
    }
}

impl<T> Bucket<T>
where
    T: Send + 'static,
{
    pub fn new(config: Arc<Config>) -> Self {
        let (sender, receiver) = mpsc::channel(config.batch_size.max(1));

        Self {
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            done: CancellationToken::new(),
            halt: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queues one item, waiting while the workers are behind.
    pub async fn consume(&self, cancel: &CancellationToken, item: T) -> Result<(), BucketError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BucketError::Cancelled),
            _ = self.halt.cancelled() => {
                Err(BucketError::ConsumerError("workers stopped after a failure".to_string()))
            }
            sent = self.sender.send(item) => sent.map_err(|_| BucketError::ChannelClosed),
        }
    }

    /// No more items will be produced. Workers flush what is queued and exit.
    pub fn close(&self) {
        self.done.cancel();
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    /// Resolves once a worker has failed.
    pub async fn halted(&self) {
        self.halt.cancelled().await
    }

    pub async fn run<P>(&self, cancel: &CancellationToken, process: P) -> Result<BucketStats, BucketError>
    where
        P: Processor<T> + 'static,
    {
        let process = Arc::new(process);
        let mut handles = Vec::with_capacity(self.config.worker_num);

        for worker_id in 0..self.config.worker_num {
            let worker = Worker {
                id: worker_id,
                receiver: self.receiver.clone(),
                process: process.clone(),
                cancel: cancel.clone(),
                done: self.done.clone(),
                halt: self.halt.clone(),
                batch_size: self.config.batch_size,
                stats: BucketStats::default(),
            };
            let timeout = self.config.timeout;
            handles.push(tokio::spawn(worker.run(timeout)));
        }

        let mut stats = BucketStats::default();
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(worker_stats)) => stats += worker_stats,
                Ok(Err(e)) => errors.push(e),
                Err(e) => {
                    self.halt.cancel();
                    errors.push(BucketError::processor(e));
                }
            }
        }

        match errors.len() {
            0 => Ok(stats),
            1 => Err(errors.remove(0)),
            _ => Err(BucketError::MultipleErrors(errors)),
        }
    }
}

struct Worker<T, P> {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    process: Arc<P>,
    cancel: CancellationToken,
    done: CancellationToken,
    halt: CancellationToken,
    batch_size: usize,
    stats: BucketStats,
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

impl<T, P> Worker<T, P>
where
    T: Send + 'static,
    P: Processor<T>,
{
    async fn run(mut self, timeout: Option<std::time::Duration>) -> Result<BucketStats, BucketError> {
        let result = self.run_loop(timeout).await;
        if let Err(e) = &result {
            warn!(worker = self.id, "worker failed: {e}");
            self.halt.cancel();
        }
        result.map(|()| self.stats)
    }

    async fn run_loop(&mut self, timeout: Option<std::time::Duration>) -> Result<(), BucketError> {
        let mut queue: Vec<T> = Vec::with_capacity(self.batch_size);
        let mut ticker = timeout.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                _ = self.halt.cancelled() => {
                    debug!(worker = self.id, dropped = queue.len(), "worker halted");
                    return Ok(());
                }

                _ = self.cancel.cancelled() => {
                    debug!(worker = self.id, "worker shutting down");
                    return self.drain(&mut queue).await;
                }

                _ = self.done.cancelled() => {
                    debug!(worker = self.id, "bucket closed");
                    return self.drain(&mut queue).await;
                }

                _ = tick(&mut ticker) => {
                    self.flush(&mut queue).await?;
                }

                item = async {
                    let mut rx = self.receiver.lock().await;
                    rx.recv().await
                } => {
                    match item {
                        Some(item) => {
                            queue.push(item);
                            if queue.len() >= self.batch_size {
                                self.flush(&mut queue).await?;
                            }
                        }
                        None => {
                            debug!(worker = self.id, "channel closed");
                            return self.flush(&mut queue).await;
                        }
                    }
                }
            }
        }
    }

    /// Takes whatever is still queued in the channel without waiting.
    async fn drain(&mut self, queue: &mut Vec<T>) -> Result<(), BucketError> {
        loop {
            let item = {
                let mut rx = self.receiver.lock().await;
                rx.try_recv().ok()
            };
            match item {
                Some(item) => {
                    queue.push(item);
                    if queue.len() >= self.batch_size {
                        self.flush(queue).await?;
                    }
                }
                None => break,
            }
        }
        self.flush(queue).await
    }

    async fn flush(&mut self, queue: &mut Vec<T>) -> Result<(), BucketError> {
        if queue.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(queue, Vec::with_capacity(self.batch_size));
        let size = batch.len();
        self.process.process(&self.cancel, batch).await?;
        self.stats.batches += 1;
        self.stats.items += size;
        Ok(())
    }
}
