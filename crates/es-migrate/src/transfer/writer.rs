//! Pool of competing bulk writers.
//!
//! Workers share one downstream receiver, so there is no ordering between
//! them. Each worker batches records and issues one bulk request per full
//! batch; a closed channel or a stop makes it flush what it holds and exit.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{BulkOutcome, DestinationStore, DocumentFailure, Page, Record};
use crate::error::{MigrateError, Result};

use super::progress::ProgressTracker;
use super::retry::RetryPolicy;

/// Writer pool settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of workers.
    pub workers: usize,
    /// Documents per bulk request.
    pub batch_size: usize,
    /// Retry policy for whole-request failures.
    pub retry: RetryPolicy,
    /// Rejected documents kept per worker for the report.
    pub failure_samples: usize,
}

/// What one worker did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub batches: u64,
    pub written: u64,
    pub errored: u64,
    pub failures: Vec<DocumentFailure>,
}

/// Aggregate of all workers after the barrier.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
    /// Fatal errors, one per failed worker.
    pub fatal: Vec<MigrateError>,
}

impl PoolReport {
    pub fn written(&self) -> u64 {
        self.workers.iter().map(|w| w.written).sum()
    }

    pub fn errored(&self) -> u64 {
        self.workers.iter().map(|w| w.errored).sum()
    }

    /// Sampled document failures of all workers.
    pub fn failures(&self) -> Vec<DocumentFailure> {
        self.workers
            .iter()
            .flat_map(|w| w.failures.iter().cloned())
            .collect()
    }
}

struct WorkerExit {
    report: WorkerReport,
    error: Option<MigrateError>,
}

/// Running workers; [`join`](WriterHandles::join) is the barrier.
pub struct WriterHandles {
    handles: Vec<(usize, JoinHandle<WorkerExit>)>,
}

impl WriterHandles {
    /// Wait for every worker and aggregate their reports.
    pub async fn join(self) -> PoolReport {
        let mut pool = PoolReport::default();
        for (worker, handle) in self.handles {
            match handle.await {
                Ok(exit) => {
                    pool.workers.push(exit.report);
                    if let Some(e) = exit.error {
                        pool.fatal.push(e);
                    }
                }
                Err(e) => {
                    error!("Writer {} task panicked: {}", worker, e);
                    pool.workers.push(WorkerReport {
                        worker,
                        ..Default::default()
                    });
                    pool.fatal.push(MigrateError::BulkWrite {
                        worker,
                        records: 0,
                        message: format!("writer task panicked: {}", e),
                    });
                }
            }
        }
        pool
    }
}

/// M workers writing into one destination index.
pub struct BulkWriterPool {
    dest: Arc<dyn DestinationStore>,
    index: String,
    config: WriterConfig,
    tracker: Arc<ProgressTracker>,
    stop: CancellationToken,
}

impl BulkWriterPool {
    pub fn new(
        dest: Arc<dyn DestinationStore>,
        index: impl Into<String>,
        config: WriterConfig,
        tracker: Arc<ProgressTracker>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            dest,
            index: index.into(),
            config,
            tracker,
            stop,
        }
    }

    /// Start the workers on the shared receiver.
    pub fn spawn(&self, pages: async_channel::Receiver<Page>) -> WriterHandles {
        let workers = self.config.workers.max(1);
        info!(
            "Starting {} bulk writers for {} (batch size: {})",
            workers, self.index, self.config.batch_size
        );

        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    dest: self.dest.clone(),
                    index: self.index.clone(),
                    batch_size: self.config.batch_size.max(1),
                    retry: self.config.retry,
                    failure_samples: self.config.failure_samples,
                    tracker: self.tracker.clone(),
                    stop: self.stop.clone(),
                };
                (id, tokio::spawn(worker.run(pages.clone())))
            })
            .collect();

        WriterHandles { handles }
    }
}

struct Worker {
    id: usize,
    dest: Arc<dyn DestinationStore>,
    index: String,
    batch_size: usize,
    retry: RetryPolicy,
    failure_samples: usize,
    tracker: Arc<ProgressTracker>,
    stop: CancellationToken,
}

impl Worker {
    async fn run(self, pages: async_channel::Receiver<Page>) -> WorkerExit {
        let mut report = WorkerReport {
            worker: self.id,
            ..Default::default()
        };
        let mut buffer: Vec<Record> = Vec::with_capacity(self.batch_size);

        let consumed = self.consume(&pages, &mut buffer, &mut report).await;
        // Stop taking pages before the final flush
        drop(pages);

        let error = match consumed {
            Ok(()) if buffer.is_empty() => None,
            Ok(()) => self.flush(&mut buffer, &mut report).await.err(),
            Err(e) => Some(e),
        };

        match &error {
            Some(e) => error!("Writer {} stopped: {}", self.id, e),
            None => debug!(
                "Writer {} finished: {} batches, {} written, {} errored",
                self.id, report.batches, report.written, report.errored
            ),
        }

        WorkerExit { report, error }
    }

    async fn consume(
        &self,
        pages: &async_channel::Receiver<Page>,
        buffer: &mut Vec<Record>,
        report: &mut WorkerReport,
    ) -> Result<()> {
        loop {
            let page = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    debug!("Writer {}: stop requested", self.id);
                    return Ok(());
                }
                next = pages.recv() => match next {
                    Ok(page) => page,
                    Err(_) => return Ok(()),
                },
            };

            for record in page.records {
                buffer.push(record);
                if buffer.len() >= self.batch_size {
                    self.flush(buffer, report).await?;
                }
            }
        }
    }

    /// Send the buffered records as one bulk request and tally the outcomes.
    async fn flush(&self, buffer: &mut Vec<Record>, report: &mut WorkerReport) -> Result<()> {
        let count = buffer.len();
        let dest = &self.dest;
        let index = self.index.as_str();
        let batch = buffer.as_slice();

        let outcomes = self
            .retry
            .run("bulk write", &self.stop, move || dest.bulk_write(index, batch))
            .await
            .map_err(|e| MigrateError::BulkWrite {
                worker: self.id,
                records: count,
                message: e.to_string(),
            })?;

        if outcomes.len() != count {
            return Err(MigrateError::BulkWrite {
                worker: self.id,
                records: count,
                message: format!(
                    "bulk response has {} items for {} documents",
                    outcomes.len(),
                    count
                ),
            });
        }

        let mut written = 0u64;
        let mut errored = 0u64;
        for outcome in outcomes {
            match outcome {
                BulkOutcome::Written { .. } => written += 1,
                BulkOutcome::Failed(failure) => {
                    errored += 1;
                    warn!("Writer {}: document rejected {}", self.id, failure);
                    if report.failures.len() < self.failure_samples {
                        report.failures.push(failure);
                    }
                }
            }
        }

        self.tracker.add_written(written);
        self.tracker.add_errored(errored);
        report.batches += 1;
        report.written += written;
        report.errored += errored;
        buffer.clear();

        debug!(
            "Writer {}: batch {} wrote {} documents ({} rejected)",
            self.id, report.batches, written, errored
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IndexSchema, SliceId};
    use crate::drivers::memory::MemoryCluster;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::time::Duration;

    fn pages(count: usize, page_size: usize) -> Vec<Page> {
        (0..count)
            .map(|seq| Page {
                slice: SliceId::new(0, 1),
                seq: seq as u64,
                records: (0..page_size)
                    .map(|i| Record::new(format!("doc-{}", seq * page_size + i), Map::new()))
                    .collect(),
            })
            .collect()
    }

    fn pool(
        dest: Arc<dyn DestinationStore>,
        workers: usize,
        batch_size: usize,
        stop: CancellationToken,
    ) -> (BulkWriterPool, Arc<ProgressTracker>) {
        let tracker = Arc::new(ProgressTracker::new());
        let pool = BulkWriterPool::new(
            dest,
            "copy",
            WriterConfig {
                workers,
                batch_size,
                retry: RetryPolicy::none(),
                failure_samples: 2,
            },
            tracker.clone(),
            stop,
        );
        (pool, tracker)
    }

    async fn feed(tx: async_channel::Sender<Page>, pages: Vec<Page>) {
        for page in pages {
            tx.send(page).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rejected_documents_are_counted_not_fatal() {
        let dest = MemoryCluster::new("mem://dst");
        dest.reject_ids(["doc-10", "doc-500", "doc-999"]);
        let (pool, tracker) = pool(Arc::new(dest.clone()), 1, 1000, CancellationToken::new());

        let (tx, rx) = async_channel::bounded(4);
        let handles = pool.spawn(rx);
        feed(tx, pages(10, 100)).await;
        let report = handles.join().await;

        assert!(report.fatal.is_empty());
        assert_eq!(report.written(), 997);
        assert_eq!(report.errored(), 3);
        assert_eq!(tracker.written(), 997);
        assert_eq!(tracker.errored(), 3);
        // Sampling keeps the first failures only
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.failures()[0].id, "doc-10");
        assert_eq!(dest.bulk_calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_batch_flushed_on_close() {
        let dest = MemoryCluster::new("mem://dst");
        let (pool, _tracker) = pool(Arc::new(dest.clone()), 1, 100, CancellationToken::new());

        let (tx, rx) = async_channel::bounded(4);
        let handles = pool.spawn(rx);
        feed(tx, pages(5, 50)).await;
        let report = handles.join().await;

        assert_eq!(report.workers[0].batches, 3);
        assert_eq!(report.written(), 250);
        assert_eq!(dest.doc_count("copy"), 250);
    }

    #[tokio::test]
    async fn test_bulk_failure_stops_only_that_writer() {
        let dest = MemoryCluster::new("mem://dst");
        dest.fail_bulk(1);
        let (pool, tracker) = pool(Arc::new(dest.clone()), 2, 100, CancellationToken::new());

        let (tx, rx) = async_channel::bounded(1);
        let handles = pool.spawn(rx);
        feed(tx, pages(6, 100)).await;
        let report = handles.join().await;

        assert_eq!(report.fatal.len(), 1);
        match &report.fatal[0] {
            MigrateError::BulkWrite { records, .. } => assert_eq!(*records, 100),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.written(), 500);
        assert_eq!(dest.doc_count("copy"), 500);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_bulk_failure() {
        let dest = MemoryCluster::new("mem://dst");
        dest.fail_bulk(2);
        let tracker = Arc::new(ProgressTracker::new());
        let pool = BulkWriterPool::new(
            Arc::new(dest.clone()),
            "copy",
            WriterConfig {
                workers: 1,
                batch_size: 100,
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                failure_samples: 10,
            },
            tracker.clone(),
            CancellationToken::new(),
        );

        let (tx, rx) = async_channel::bounded(1);
        let handles = pool.spawn(rx);
        feed(tx, pages(2, 100)).await;
        let report = handles.join().await;

        assert!(report.fatal.is_empty());
        assert_eq!(tracker.written(), 200);
        assert_eq!(dest.bulk_calls(), 4);
    }

    #[tokio::test]
    async fn test_stop_flushes_buffer_and_exits() {
        let dest = MemoryCluster::new("mem://dst");
        let stop = CancellationToken::new();
        let (pool, tracker) = pool(Arc::new(dest.clone()), 1, 1000, stop.clone());

        let (tx, rx) = async_channel::bounded(8);
        let handles = pool.spawn(rx);
        feed(tx.clone(), pages(3, 100)).await;
        while !tx.is_empty() {
            tokio::task::yield_now().await;
        }
        stop.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), handles.join())
            .await
            .expect("writers should exit on stop");
        assert!(report.fatal.is_empty());
        assert_eq!(tracker.written(), 300);
        assert_eq!(dest.doc_count("copy"), 300);
        drop(tx);
    }

    struct ShortResponses;

    #[async_trait]
    impl DestinationStore for ShortResponses {
        async fn exists(&self, _index: &str) -> Result<bool> {
            Ok(true)
        }
        async fn delete(&self, _index: &str) -> Result<()> {
            Ok(())
        }
        async fn create(&self, _index: &str, _schema: &IndexSchema) -> Result<()> {
            Ok(())
        }
        async fn bulk_write(&self, _index: &str, records: &[Record]) -> Result<Vec<BulkOutcome>> {
            Ok(records
                .iter()
                .skip(1)
                .map(|r| BulkOutcome::Written { id: r.id.clone() })
                .collect())
        }
        fn endpoint(&self) -> &str {
            "mock://short"
        }
    }

    #[tokio::test]
    async fn test_outcome_count_mismatch_is_fatal() {
        let (pool, tracker) = pool(Arc::new(ShortResponses), 1, 10, CancellationToken::new());
        let (tx, rx) = async_channel::bounded(1);
        let handles = pool.spawn(rx);
        // The failed writer drops its receiver; later sends may fail
        for page in pages(3, 10) {
            if tx.send(page).await.is_err() {
                break;
            }
        }
        drop(tx);
        let report = handles.join().await;

        assert_eq!(report.fatal.len(), 1);
        assert!(report.fatal[0].to_string().contains("9 items for 10 documents"));
        assert_eq!(tracker.written(), 0);
    }
}
