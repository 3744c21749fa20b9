//! Sliced cursor reader.
//!
//! The source index is split into N disjoint slices. Each slice gets its own
//! scroll cursor and its own producer task, which emits pages onto the shared
//! upstream buffer until the cursor runs dry, fails, or the run stops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{CursorPage, Page, SliceId, SourceStore};
use crate::error::{MigrateError, Result};
use crate::transfer::RetryPolicy;

/// Reader settings.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub index: String,
    pub slices: u32,
    pub page_size: usize,
    pub keep_alive: Duration,
    /// Pages a blocked producer may fetch ahead to keep its cursor alive.
    pub read_ahead_pages: usize,
    pub retry: RetryPolicy,
}

/// How a slice ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SliceOutcome {
    /// The cursor returned an empty page.
    Exhausted,
    /// The run stopped or the coordinator closed the buffer.
    Cancelled,
    /// Open or advance failed; the slice was closed early.
    Failed(String),
}

/// Summary of one slice producer.
#[derive(Debug, Clone, Serialize)]
pub struct SliceReport {
    pub slice: SliceId,
    pub pages: u64,
    pub records: u64,
    /// Total-hit estimate from the first page.
    pub estimate: u64,
    pub outcome: SliceOutcome,
}

impl SliceReport {
    fn failed(slice: SliceId, message: String) -> Self {
        Self {
            slice,
            pages: 0,
            records: 0,
            estimate: 0,
            outcome: SliceOutcome::Failed(message),
        }
    }
}

/// A slice whose cursor is open, with its first page not yet emitted.
#[derive(Debug)]
pub struct OpenSlice {
    pub slice: SliceId,
    pub first: CursorPage,
}

/// Result of opening every slice.
#[derive(Debug, Default)]
pub struct OpenedSlices {
    pub open: Vec<OpenSlice>,
    /// Reports for slices that could not be opened.
    pub failed: Vec<SliceReport>,
}

impl OpenedSlices {
    /// Sum of the per-slice estimates: the natural total of the run.
    pub fn estimated_total(&self) -> u64 {
        self.open.iter().map(|s| s.first.total).sum()
    }
}

/// Opens slices and runs their producers.
pub struct SlicedCursorReader {
    source: Arc<dyn SourceStore>,
    config: ReaderConfig,
}

impl SlicedCursorReader {
    pub fn new(source: Arc<dyn SourceStore>, config: ReaderConfig) -> Self {
        Self { source, config }
    }

    /// Open all slices concurrently.
    pub async fn open(&self, cancel: &CancellationToken) -> OpenedSlices {
        let n = self.config.slices.max(1);
        info!(
            "Opening {} slices on {} (page size {}, keep-alive {:?})",
            n, self.config.index, self.config.page_size, self.config.keep_alive
        );

        let opens = SliceId::split(n).into_iter().map(|slice| async move {
            let source = &self.source;
            let config = &self.config;
            let result = config
                .retry
                .run("open cursor", cancel, || {
                    source.open_sliced_cursor(&config.index, slice, config.page_size, config.keep_alive)
                })
                .await;
            (slice, result)
        });

        let mut opened = OpenedSlices::default();
        for (slice, result) in join_all(opens).await {
            match result {
                Ok(first) => {
                    debug!("Slice {} opened, estimate {}", slice, first.total);
                    opened.open.push(OpenSlice { slice, first });
                }
                Err(e) => {
                    warn!("Slice {} failed to open: {}", slice, e);
                    opened.failed.push(SliceReport::failed(slice, e.to_string()));
                }
            }
        }

        info!(
            "{} of {} slices open, estimated {} documents",
            opened.open.len(),
            n,
            opened.estimated_total()
        );
        opened
    }

    /// Start one producer per open slice.
    pub fn spawn(
        &self,
        slices: Vec<OpenSlice>,
        pages: mpsc::Sender<Page>,
        cancel: CancellationToken,
    ) -> ProducerHandles {
        let handles = slices
            .into_iter()
            .map(|open| {
                let producer = Producer {
                    slice: open.slice,
                    source: self.source.clone(),
                    keep_alive: self.config.keep_alive,
                    read_ahead: self.config.read_ahead_pages,
                    retry: self.config.retry,
                    cancel: cancel.clone(),
                    token: None,
                    drained: false,
                    deferred: None,
                    ahead: VecDeque::new(),
                    report: SliceReport {
                        slice: open.slice,
                        pages: 0,
                        records: 0,
                        estimate: open.first.total,
                        outcome: SliceOutcome::Exhausted,
                    },
                };
                (open.slice, tokio::spawn(producer.run(open.first, pages.clone())))
            })
            .collect();

        ProducerHandles { handles }
    }
}

/// Running producers.
pub struct ProducerHandles {
    handles: Vec<(SliceId, JoinHandle<SliceReport>)>,
}

impl ProducerHandles {
    /// Wait for every producer.
    pub async fn join(self) -> Vec<SliceReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for (slice, handle) in self.handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!("Producer for slice {} panicked: {}", slice, e);
                    reports.push(SliceReport::failed(slice, format!("producer panicked: {}", e)));
                }
            }
        }
        reports
    }
}

struct Producer {
    slice: SliceId,
    source: Arc<dyn SourceStore>,
    keep_alive: Duration,
    read_ahead: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    token: Option<String>,
    /// The cursor has returned its last page.
    drained: bool,
    /// Read-ahead failure, reported once the queue is emitted.
    deferred: Option<MigrateError>,
    ahead: VecDeque<CursorPage>,
    report: SliceReport,
}

enum Sent {
    Delivered,
    Cancelled,
}

impl Producer {
    async fn run(mut self, first: CursorPage, pages: mpsc::Sender<Page>) -> SliceReport {
        self.accept(first);

        let outcome = loop {
            let next = match self.ahead.pop_front() {
                Some(page) => page,
                None => {
                    if let Some(e) = self.deferred.take() {
                        break self.failure(e);
                    }
                    if self.drained {
                        break SliceOutcome::Exhausted;
                    }
                    if self.cancel.is_cancelled() {
                        break SliceOutcome::Cancelled;
                    }
                    match self.advance().await {
                        Ok(()) => continue,
                        Err(e) => break self.failure(e),
                    }
                }
            };

            match self.send(next, &pages).await {
                Sent::Delivered => {}
                Sent::Cancelled => break SliceOutcome::Cancelled,
            }
        };

        self.close(outcome).await
    }

    /// Queue a fetched page, or mark the cursor drained if it is empty.
    fn accept(&mut self, page: CursorPage) {
        if page.token.is_some() {
            self.token = page.token.clone();
        }
        if page.is_exhausted() {
            self.drained = true;
            return;
        }
        if self.token.is_none() {
            // Nothing to advance with after this page
            self.drained = true;
        }
        self.ahead.push_back(page);
    }

    async fn advance(&mut self) -> Result<()> {
        let token = match self.token.clone() {
            Some(token) => token,
            None => {
                self.drained = true;
                return Ok(());
            }
        };
        let source = &self.source;
        let keep_alive = self.keep_alive;
        let page = self
            .retry
            .run("advance cursor", &self.cancel, || {
                source.advance_cursor(&token, keep_alive)
            })
            .await?;
        self.accept(page);
        Ok(())
    }

    /// Emit one page, renewing the cursor while the buffer stays full.
    async fn send(&mut self, page: CursorPage, pages: &mpsc::Sender<Page>) -> Sent {
        let renew_after = self.keep_alive / 2;
        let reserve = pages.reserve();
        tokio::pin!(reserve);

        let permit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Sent::Cancelled,
                permit = &mut reserve => match permit {
                    Ok(permit) => break permit,
                    Err(_) => return Sent::Cancelled,
                },
                _ = tokio::time::sleep(renew_after) => self.renew().await,
            }
        };

        let count = page.records.len() as u64;
        permit.send(Page {
            slice: self.slice,
            seq: self.report.pages,
            records: page.records,
        });
        self.report.pages += 1;
        self.report.records += count;
        Sent::Delivered
    }

    /// Advance ahead of the consumer so the cursor does not expire.
    async fn renew(&mut self) {
        if self.drained || self.deferred.is_some() {
            return;
        }
        if self.ahead.len() >= self.read_ahead {
            debug!(
                "Slice {}: read-ahead full ({} pages), cursor not renewed",
                self.slice,
                self.ahead.len()
            );
            return;
        }
        debug!("Slice {}: blocked on full buffer, renewing cursor", self.slice);
        if let Err(e) = self.advance().await {
            self.deferred = Some(e);
        }
    }

    fn failure(&self, e: MigrateError) -> SliceOutcome {
        let e = match e {
            MigrateError::CursorExpired { message, .. } => MigrateError::CursorExpired {
                slice: self.slice.to_string(),
                message,
            },
            other => other,
        };
        warn!("Slice {} closed early: {}", self.slice, e);
        SliceOutcome::Failed(e.to_string())
    }

    async fn close(mut self, outcome: SliceOutcome) -> SliceReport {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.source.clear_cursor(&token).await {
                debug!("Slice {}: releasing cursor failed: {}", self.slice, e);
            }
        }
        debug!(
            "Slice {} closed ({:?}): {} pages, {} records",
            self.slice, outcome, self.report.pages, self.report.records
        );
        self.report.outcome = outcome;
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryCluster;
    use serde_json::json;

    fn config(slices: u32, page_size: usize) -> ReaderConfig {
        ReaderConfig {
            index: "articles".into(),
            slices,
            page_size,
            keep_alive: Duration::from_secs(60),
            read_ahead_pages: 4,
            retry: RetryPolicy::none(),
        }
    }

    fn cluster(docs: usize) -> Arc<MemoryCluster> {
        let cluster = MemoryCluster::new("mem://src");
        cluster.create_index("articles", json!({}), json!({}));
        cluster.seed("articles", docs);
        Arc::new(cluster)
    }

    #[tokio::test]
    async fn test_slice_estimates_sum_to_total() {
        let reader = SlicedCursorReader::new(cluster(1234), config(5, 100));
        let opened = reader.open(&CancellationToken::new()).await;
        assert_eq!(opened.open.len(), 5);
        assert!(opened.failed.is_empty());
        assert_eq!(opened.estimated_total(), 1234);
    }

    #[tokio::test]
    async fn test_producers_emit_every_document() {
        let source = cluster(1050);
        let reader = SlicedCursorReader::new(source.clone(), config(3, 100));
        let opened = reader.open(&CancellationToken::new()).await;

        let (tx, mut rx) = mpsc::channel(8);
        let handles = reader.spawn(opened.open, tx, CancellationToken::new());

        let mut received = 0;
        while let Some(page) = rx.recv().await {
            assert!(!page.is_empty());
            received += page.len();
        }
        let reports = handles.join().await;

        assert_eq!(received, 1050);
        assert!(reports.iter().all(|r| r.outcome == SliceOutcome::Exhausted));
        assert_eq!(reports.iter().map(|r| r.records).sum::<u64>(), 1050);
        assert_eq!(source.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_slices() {
        let reader = SlicedCursorReader::new(cluster(5000), config(2, 10));
        let opened = reader.open(&CancellationToken::new()).await;

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let handles = reader.spawn(opened.open, tx, cancel.clone());

        rx.recv().await.unwrap();
        cancel.cancel();
        let reports = tokio::time::timeout(Duration::from_secs(5), handles.join())
            .await
            .expect("producers should stop");
        assert!(reports.iter().all(|r| r.outcome == SliceOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_expired_cursor_fails_only_that_slice() {
        let source = cluster(400);
        let reader = SlicedCursorReader::new(source.clone(), config(2, 50));
        let opened = reader.open(&CancellationToken::new()).await;
        source.expire_cursors_of_slice(0);

        let (tx, mut rx) = mpsc::channel(64);
        let handles = reader.spawn(opened.open, tx, CancellationToken::new());
        let mut received = 0;
        while let Some(page) = rx.recv().await {
            received += page.len();
        }
        let reports = handles.join().await;

        let failed: Vec<_> = reports
            .iter()
            .filter(|r| matches!(r.outcome, SliceOutcome::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].slice, SliceId::new(0, 2));
        assert_eq!(failed[0].pages, 1);
        assert_eq!(received, 200 + 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_producer_reads_ahead() {
        let source = cluster(1000);
        let mut cfg = config(1, 100);
        cfg.keep_alive = Duration::from_secs(10);
        cfg.read_ahead_pages = 3;
        let reader = SlicedCursorReader::new(source.clone(), cfg);
        let opened = reader.open(&CancellationToken::new()).await;

        let (tx, mut rx) = mpsc::channel(1);
        let handles = reader.spawn(opened.open, tx, CancellationToken::new());

        // Nobody consumes for a while: the buffer holds one page, the
        // producer keeps renewing into its read-ahead queue
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.advance_calls(), 4);

        let mut received = 0;
        while let Some(page) = rx.recv().await {
            received += page.len();
        }
        handles.join().await;
        assert_eq!(received, 1000);
    }
}
