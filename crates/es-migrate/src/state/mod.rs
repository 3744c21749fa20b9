//! Job lifecycle: status state machine and the one-shot stop request.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};

/// Lifecycle of a migration job.
///
/// ```text
/// Created -> Provisioning -> Running -> Draining -> Completed | Cancelled | Failed
///                 |             |
///                 |             +-> Failed
///                 +-> Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Provisioning,
    Running,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Created, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Provisioning, Cancelled)
                | (Running, Draining)
                | (Running, Failed)
                | (Draining, Completed)
                | (Draining, Cancelled)
                | (Draining, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Provisioning => "provisioning",
            JobStatus::Running => "running",
            JobStatus::Draining => "draining",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable job status. Transitions are validated against the lifecycle.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<JobStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(JobStatus::Created);
        Self { tx }
    }

    pub fn get(&self) -> JobStatus {
        *self.tx.borrow()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting edges that are not part of the lifecycle.
    pub fn advance(&self, next: JobStatus) -> Result<()> {
        let mut from = next;
        let moved = self.tx.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!("Job status: {} -> {}", from, next);
            Ok(())
        } else {
            Err(MigrateError::InvalidTransition { from, to: next })
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every slice ran out of documents.
    Exhausted,
    /// The item budget was met.
    BudgetReached,
    /// An external caller asked the job to stop.
    Requested(String),
    /// Some slices closed early; the source was not fully read.
    SlicesFailed { failed: usize, total: usize },
    /// A writer failed fatally.
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("source exhausted"),
            StopReason::BudgetReached => f.write_str("budget reached"),
            StopReason::SlicesFailed { failed, total } => write!(
                f,
                "source partially read: {} of {} slices failed",
                failed, total
            ),
            StopReason::Requested(reason) => f.write_str(reason),
            StopReason::Failed(reason) => f.write_str(reason),
        }
    }
}

/// One-shot cancellation entry point shared by every stage of a run.
///
/// The first reason recorded wins. Later calls, including calls after the run
/// settled its own reason, are no-ops.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Ask the run to stop. Returns false if a reason was already recorded.
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.reason.set(StopReason::Requested(reason.clone())).is_ok() {
            info!("Stop requested: {}", reason);
            self.token.cancel();
            true
        } else {
            debug!("Ignoring stop request '{}': run already stopping", reason);
            false
        }
    }

    /// Whether an external stop was accepted.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded so far, if any.
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().cloned()
    }

    /// Token cancelled by an accepted [`stop`](Self::stop).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record the run's own reason unless a stop already won; returns the winner.
    pub(crate) fn settle(&self, reason: StopReason) -> StopReason {
        self.reason.get_or_init(|| reason).clone()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}
