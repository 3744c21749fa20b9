//! Funnel between the slice producers and the writer pool.
//!
//! The coordinator is the only owner of the downstream sender. It applies the
//! item budget and the stop request, and dropping that sender on exit is what
//! tells the writers to drain.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::Page;

use super::progress::ProgressTracker;

/// Why the coordinator stopped forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelOutcome {
    /// Every producer finished and the upstream buffer is empty.
    Exhausted,
    /// The item budget was met.
    BudgetReached,
    /// An external stop pre-empted forwarding.
    Stopped,
    /// Every writer exited; nothing can be written any more.
    WritersGone,
}

/// Serialized arbiter between slices and writers.
pub struct Coordinator {
    budget: u64,
    tracker: Arc<ProgressTracker>,
    stop: CancellationToken,
    producers: CancellationToken,
}

impl Coordinator {
    /// `budget` of 0 means no limit. `producers` is cancelled when the
    /// coordinator exits so that abandoned slices stop fetching.
    pub fn new(
        budget: u64,
        tracker: Arc<ProgressTracker>,
        stop: CancellationToken,
        producers: CancellationToken,
    ) -> Self {
        Self {
            budget,
            tracker,
            stop,
            producers,
        }
    }

    /// Forward pages until the sources run dry, the budget is met, a stop is
    /// requested or the writers are gone.
    pub async fn run(
        self,
        mut pages: mpsc::Receiver<Page>,
        writers: async_channel::Sender<Page>,
    ) -> FunnelOutcome {
        let outcome = self.forward(&mut pages, &writers).await;

        // Pool-drain signal: the writers see a closed channel once it is empty
        drop(writers);
        self.producers.cancel();
        // Producers blocked on a full buffer fail their send and exit
        pages.close();

        info!(
            "Coordinator finished ({:?}): {} documents forwarded",
            outcome,
            self.tracker.scrolled()
        );
        outcome
    }

    async fn forward(
        &self,
        pages: &mut mpsc::Receiver<Page>,
        writers: &async_channel::Sender<Page>,
    ) -> FunnelOutcome {
        loop {
            let mut page = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return FunnelOutcome::Stopped,
                next = pages.recv() => match next {
                    Some(page) => page,
                    None => return FunnelOutcome::Exhausted,
                },
            };

            if page.is_empty() {
                continue;
            }

            let mut reached = false;
            if self.budget > 0 {
                let remaining = self.budget.saturating_sub(self.tracker.scrolled());
                if page.len() as u64 >= remaining {
                    page.records.truncate(remaining as usize);
                    reached = true;
                }
            }

            let count = page.len() as u64;
            let (slice, seq) = (page.slice, page.seq);
            // Counted before the hand-over so a fast writer never outruns it
            let total = self.tracker.add_scrolled(count);
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.tracker.retract_scrolled(count);
                    return FunnelOutcome::Stopped;
                }
                sent = writers.send(page) => {
                    if sent.is_err() {
                        self.tracker.retract_scrolled(count);
                        return FunnelOutcome::WritersGone;
                    }
                }
            }

            debug!(
                "Forwarded page {} of slice {} ({} documents, {} total)",
                seq, slice, count, total
            );

            if reached {
                return FunnelOutcome::BudgetReached;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Record, SliceId};
    use serde_json::Map;

    fn page(slice: u32, seq: u64, n: usize) -> Page {
        Page {
            slice: SliceId::new(slice, 2),
            seq,
            records: (0..n)
                .map(|i| Record::new(format!("{}-{}-{}", slice, seq, i), Map::new()))
                .collect(),
        }
    }

    fn setup(
        budget: u64,
    ) -> (
        Coordinator,
        Arc<ProgressTracker>,
        CancellationToken,
        CancellationToken,
    ) {
        let tracker = Arc::new(ProgressTracker::new());
        let stop = CancellationToken::new();
        let producers = stop.child_token();
        let coordinator = Coordinator::new(budget, tracker.clone(), stop.clone(), producers.clone());
        (coordinator, tracker, stop, producers)
    }

    #[tokio::test]
    async fn test_forwards_everything_without_budget() {
        let (coordinator, tracker, _stop, producers) = setup(0);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(16);

        for seq in 0..5 {
            tx.send(page(0, seq, 100)).await.unwrap();
        }
        tx.send(page(1, 0, 0)).await.unwrap();
        drop(tx);

        let outcome = coordinator.run(rx, wtx).await;
        assert_eq!(outcome, FunnelOutcome::Exhausted);
        assert_eq!(tracker.scrolled(), 500);
        assert!(producers.is_cancelled());

        let mut received = 0;
        while let Ok(p) = wrx.recv().await {
            received += p.len();
        }
        assert_eq!(received, 500);
    }

    #[tokio::test]
    async fn test_budget_truncates_last_page_and_closes_downstream() {
        let (coordinator, tracker, _stop, producers) = setup(250);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(16);

        for seq in 0..5 {
            tx.send(page(0, seq, 100)).await.unwrap();
        }

        let outcome = coordinator.run(rx, wtx).await;
        assert_eq!(outcome, FunnelOutcome::BudgetReached);
        assert_eq!(tracker.scrolled(), 250);
        assert!(producers.is_cancelled());
        assert!(tx.is_closed());

        let sizes: Vec<usize> = {
            let mut v = Vec::new();
            while let Ok(p) = wrx.recv().await {
                v.push(p.len());
            }
            v
        };
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_stop_preempts_forwarding() {
        let (coordinator, tracker, stop, producers) = setup(0);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(16);

        tx.send(page(0, 0, 10)).await.unwrap();
        stop.cancel();

        let outcome = coordinator.run(rx, wtx).await;
        assert_eq!(outcome, FunnelOutcome::Stopped);
        assert_eq!(tracker.scrolled(), 0);
        assert!(producers.is_cancelled());
        assert!(wrx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_writers_gone() {
        let (coordinator, tracker, _stop, _producers) = setup(0);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(1);
        drop(wrx);

        tx.send(page(0, 0, 10)).await.unwrap();
        let outcome = coordinator.run(rx, wtx).await;
        assert_eq!(outcome, FunnelOutcome::WritersGone);
        assert_eq!(tracker.scrolled(), 0);
    }

    #[tokio::test]
    async fn test_pages_are_counted_before_writers_receive_them() {
        let (coordinator, tracker, _stop, _producers) = setup(0);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(1);

        for seq in 0..6 {
            tx.send(page(0, seq, 50)).await.unwrap();
        }
        drop(tx);
        let run = tokio::spawn(coordinator.run(rx, wtx));

        let mut received = 0;
        while let Ok(p) = wrx.recv().await {
            received += p.len() as u64;
            assert!(tracker.scrolled() >= received);
        }
        assert_eq!(run.await.unwrap(), FunnelOutcome::Exhausted);
        assert_eq!(received, 300);
    }

    #[tokio::test]
    async fn test_stop_during_blocked_handoff_gives_back_count() {
        let (coordinator, tracker, stop, _producers) = setup(0);
        let (tx, rx) = mpsc::channel(16);
        let (wtx, wrx) = async_channel::bounded(1);

        tx.send(page(0, 0, 10)).await.unwrap();
        tx.send(page(0, 1, 10)).await.unwrap();
        let run = tokio::spawn(coordinator.run(rx, wtx));

        // The second page waits for room in the writer queue
        while tracker.scrolled() < 20 {
            tokio::task::yield_now().await;
        }
        stop.cancel();

        assert_eq!(run.await.unwrap(), FunnelOutcome::Stopped);
        assert_eq!(tracker.scrolled(), 10);
        assert_eq!(wrx.recv().await.unwrap().len(), 10);
    }
}
