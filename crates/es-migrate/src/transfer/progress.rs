//! Lock-free progress counters shared by every stage of a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub scrolled: u64,
    pub written: u64,
    pub errored: u64,
}

/// Thread-safe progress tracker.
///
/// Counters are updated with atomic increments. Waiters on the scrolled count
/// are woken through a [`Notify`] instead of polling.
///
/// Documents are counted as scrolled before their page is handed to the
/// writers, so `written + errored <= scrolled` holds in every snapshot.
#[derive(Debug)]
pub struct ProgressTracker {
    scrolled: AtomicU64,
    written: AtomicU64,
    errored: AtomicU64,
    scrolled_changed: Notify,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            scrolled: AtomicU64::new(0),
            written: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            scrolled_changed: Notify::new(),
            start_time: Instant::now(),
        }
    }

    /// Count documents handed to the writers. Returns the new total.
    pub fn add_scrolled(&self, count: u64) -> u64 {
        let total = self.scrolled.fetch_add(count, Ordering::AcqRel) + count;
        self.scrolled_changed.notify_waiters();
        total
    }

    /// Give back a count whose page was never handed over.
    pub fn retract_scrolled(&self, count: u64) {
        self.scrolled.fetch_sub(count, Ordering::AcqRel);
    }

    /// Count documents the destination accepted.
    pub fn add_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::AcqRel);
    }

    /// Count documents the destination rejected.
    pub fn add_errored(&self, count: u64) {
        self.errored.fetch_add(count, Ordering::AcqRel);
    }

    pub fn scrolled(&self) -> u64 {
        self.scrolled.load(Ordering::Acquire)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        // Outcomes first: anything they count was already scrolled
        let written = self.written();
        let errored = self.errored();
        ProgressSnapshot {
            scrolled: self.scrolled(),
            written,
            errored,
        }
    }

    /// Wait until at least `target` documents have been scrolled.
    pub async fn wait_for_scrolled(&self, target: u64) {
        loop {
            let notified = self.scrolled_changed.notified();
            tokio::pin!(notified);
            // Register before checking so an increment in between is not missed
            notified.as_mut().enable();
            if self.scrolled() >= target {
                return;
            }
            notified.await;
        }
    }

    /// Written documents per second since the tracker was created.
    pub fn docs_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.written() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
