//! Background watcher for a running job.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::transfer::ProgressTracker;

/// Logs progress periodically and stops the producers once the budget is met.
pub(crate) struct Monitor {
    pub tracker: Arc<ProgressTracker>,
    pub budget: u64,
    pub estimated_total: u64,
    pub producers: CancellationToken,
    pub interval: Duration,
    pub done: CancellationToken,
}

impl Monitor {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let period = self.interval.max(Duration::from_millis(10));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let budget = self.budget;
        let tracker = self.tracker.clone();
        let budget_met = async move {
            if budget > 0 {
                tracker.wait_for_scrolled(budget).await
            } else {
                std::future::pending::<()>().await
            }
        };
        tokio::pin!(budget_met);
        let mut budget_seen = false;

        loop {
            tokio::select! {
                biased;
                _ = self.done.cancelled() => break,
                _ = &mut budget_met, if !budget_seen => {
                    budget_seen = true;
                    info!("Item budget of {} reached, closing slices", budget);
                    self.producers.cancel();
                }
                _ = ticker.tick() => self.log_progress(),
            }
        }
    }

    fn log_progress(&self) {
        let snapshot = self.tracker.snapshot();
        let target = match (self.budget, self.estimated_total) {
            (0, total) => total,
            (budget, 0) => budget,
            (budget, total) => budget.min(total),
        };
        info!(
            "Progress: {}/{} scrolled, {} written, {} errored ({:.0} docs/s)",
            snapshot.scrolled,
            target,
            snapshot.written,
            snapshot.errored,
            self.tracker.docs_per_second()
        );
    }
}
