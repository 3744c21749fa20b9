//! Migration controller - main workflow coordinator.

mod health;
mod job;
mod monitor;
mod session;

pub use health::{health_check, EndpointHealth, HealthCheckResult};
pub use job::MigrationJob;
pub use session::Session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::{DestinationStore, DocumentFailure};
use crate::error::{MigrateError, Result};
use crate::schema::SchemaProvisioner;
use crate::source::{ReaderConfig, SliceOutcome, SliceReport, SlicedCursorReader};
use crate::state::{JobStatus, StatusCell, StopHandle, StopReason};
use crate::transfer::{
    BulkWriterPool, Coordinator, FunnelOutcome, ProgressSnapshot, ProgressTracker, WriterConfig,
};

use monitor::Monitor;

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: JobStatus,

    /// Why the run stopped: "source exhausted", "budget reached", the
    /// caller's stop reason, the slices that failed, or the fatal writer error.
    pub stop_reason: String,

    /// Documents forwarded to the writers.
    pub scrolled: u64,

    /// Documents the destination accepted.
    pub written: u64,

    /// Documents the destination rejected.
    pub errored: u64,

    /// Sum of the per-slice hit estimates.
    pub estimated_total: u64,

    pub slices: Vec<SliceReport>,

    /// Sampled rejected documents.
    pub failures: Vec<DocumentFailure>,

    /// Fatal writer errors.
    pub errors: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Average write throughput.
    pub docs_per_second: f64,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs one migration job.
///
/// A controller drives exactly one run; a second [`migrate`](Self::migrate)
/// is rejected as an invalid status transition. [`stop`](Self::stop) may be
/// called from anywhere, including through a [`StopHandle`] moved into a
/// signal handler.
pub struct MigrationController {
    session: Session,
    job: MigrationJob,
    status: StatusCell,
    stop: StopHandle,
    tracker: Arc<ProgressTracker>,
}

impl MigrationController {
    pub fn new(session: Session, job: MigrationJob) -> Self {
        Self {
            session,
            job,
            status: StatusCell::new(),
            stop: StopHandle::new(),
            tracker: Arc::new(ProgressTracker::new()),
        }
    }

    /// Ask the run to stop. The first reason wins; never blocks.
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        self.stop.stop(reason)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> JobStatus {
        self.status.get()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn job(&self) -> &MigrationJob {
        &self.job
    }

    /// Run the migration to its end.
    ///
    /// Returns `Err(MigrateError::JobFailed)` carrying the full result when a
    /// writer failed fatally or a slice closed before its cursor was drained;
    /// provisioning errors are returned as they are. A stop accepted before
    /// the run starts leaves the destination untouched.
    pub async fn migrate(&self) -> Result<MigrationResult> {
        self.status.advance(JobStatus::Provisioning)?;
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let job = &self.job;

        if let Some(StopReason::Requested(reason)) = self.stop.reason() {
            info!("Run {} cancelled before provisioning: {}", run_id, reason);
            self.status.advance(JobStatus::Cancelled)?;
            let run = TransferRun::not_started();
            return self.finish(run_id, started_at, JobStatus::Cancelled, reason, run);
        }

        info!(
            "Starting migration run {}: {}/{} -> {}/{}",
            run_id,
            self.session.alias,
            job.source_index,
            job.destination.display_name(),
            job.dest_index
        );

        // Phase 1: destination index
        info!("Phase 1: Provisioning destination index");
        let dest = match self.provision().await {
            Ok(dest) => dest,
            Err(e) => {
                error!("Provisioning failed: {}", e);
                self.status.advance(JobStatus::Failed)?;
                self.stop.settle(StopReason::Failed(e.to_string()));
                return Err(e);
            }
        };

        // Phase 2: pipeline
        info!("Phase 2: Transferring documents");
        self.status.advance(JobStatus::Running)?;
        let run = self.transfer(dest).await;

        // Phase 3: settle
        let (status, reason) = match run.fatal.first() {
            Some(first) => {
                let reason = self.stop.settle(StopReason::Failed(first.clone()));
                // A fatal writer error outranks an earlier stop request
                let message = match reason {
                    StopReason::Failed(message) => message,
                    _ => first.clone(),
                };
                (JobStatus::Failed, message)
            }
            None => {
                let failed = run.failed_slices();
                let reason = match run.outcome {
                    FunnelOutcome::BudgetReached => self.stop.settle(StopReason::BudgetReached),
                    _ if failed > 0 => self.stop.settle(StopReason::SlicesFailed {
                        failed,
                        total: run.slices.len(),
                    }),
                    _ => self.stop.settle(StopReason::Exhausted),
                };
                let status = match reason {
                    StopReason::Requested(_) => JobStatus::Cancelled,
                    StopReason::Failed(_) | StopReason::SlicesFailed { .. } => JobStatus::Failed,
                    StopReason::Exhausted | StopReason::BudgetReached => JobStatus::Completed,
                };
                (status, reason.to_string())
            }
        };
        self.status.advance(status)?;
        self.finish(run_id, started_at, status, reason, run)
    }

    fn finish(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        status: JobStatus,
        reason: String,
        run: TransferRun,
    ) -> Result<MigrationResult> {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let snapshot = self.tracker.snapshot();
        let result = MigrationResult {
            run_id,
            status,
            stop_reason: reason,
            scrolled: snapshot.scrolled,
            written: snapshot.written,
            errored: snapshot.errored,
            estimated_total: run.estimated_total,
            slices: run.slices,
            failures: run.failures,
            errors: run.fatal,
            started_at,
            completed_at,
            duration_seconds,
            docs_per_second: if duration_seconds > 0.0 {
                snapshot.written as f64 / duration_seconds
            } else {
                0.0
            },
        };

        info!(
            "Migration {} ({}): {} scrolled, {} written, {} errored in {:.1}s ({:.0} docs/s)",
            result.status,
            result.stop_reason,
            result.scrolled,
            result.written,
            result.errored,
            result.duration_seconds,
            result.docs_per_second
        );

        if result.status == JobStatus::Failed {
            return Err(MigrateError::JobFailed {
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    async fn provision(&self) -> Result<Arc<dyn DestinationStore>> {
        let dest = self.session.connector.connect(&self.job.destination).await?;
        let provisioner = SchemaProvisioner::new(self.session.source.clone(), dest.clone());
        let schema = provisioner.fetch_source_schema(&self.job.source_index).await?;
        provisioner.provision(&self.job.dest_index, &schema).await?;
        Ok(dest)
    }

    async fn transfer(&self, dest: Arc<dyn DestinationStore>) -> TransferRun {
        let job = &self.job;
        let stop = self.stop.token();
        let producers = stop.child_token();

        let reader = SlicedCursorReader::new(
            self.session.source.clone(),
            ReaderConfig {
                index: job.source_index.clone(),
                slices: job.slices,
                page_size: job.page_size,
                keep_alive: job.keep_alive,
                read_ahead_pages: job.read_ahead_pages,
                retry: job.retry,
            },
        );
        let opened = reader.open(&producers).await;
        let estimated_total = opened.estimated_total();
        let mut slices = opened.failed;

        let (page_tx, page_rx) = mpsc::channel(job.page_buffer.max(1));
        let (write_tx, write_rx) = async_channel::bounded(job.write_buffer.max(1));

        let pool = BulkWriterPool::new(
            dest,
            job.dest_index.clone(),
            WriterConfig {
                workers: job.workers,
                batch_size: job.batch_size,
                retry: job.retry,
                failure_samples: job.failure_samples,
            },
            self.tracker.clone(),
            stop.clone(),
        );
        let writers = pool.spawn(write_rx);
        let slice_tasks = reader.spawn(opened.open, page_tx, producers.clone());

        let monitor_done = CancellationToken::new();
        let monitor = Monitor {
            tracker: self.tracker.clone(),
            budget: job.item_budget,
            estimated_total,
            producers: producers.clone(),
            interval: job.progress_interval,
            done: monitor_done.clone(),
        }
        .spawn();

        let coordinator = Coordinator::new(job.item_budget, self.tracker.clone(), stop, producers);
        let mut fatal = Vec::new();
        let outcome = match tokio::spawn(coordinator.run(page_rx, write_tx)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Coordinator task panicked: {}", e);
                fatal.push(format!("coordinator panicked: {}", e));
                FunnelOutcome::Stopped
            }
        };

        if let Err(e) = self.status.advance(JobStatus::Draining) {
            warn!("{}", e);
        }
        info!("Draining writers ({:?})", outcome);

        let pool_report = writers.join().await;
        slices.extend(slice_tasks.join().await);
        monitor_done.cancel();
        if let Err(e) = monitor.await {
            warn!("Monitor task panicked: {}", e);
        }

        fatal.extend(pool_report.fatal.iter().map(ToString::to_string));
        if outcome == FunnelOutcome::WritersGone && fatal.is_empty() {
            fatal.push("all writers exited before the source was drained".into());
        }
        slices.sort_by_key(|report| report.slice.id);

        TransferRun {
            outcome,
            estimated_total,
            slices,
            failures: pool_report.failures(),
            fatal,
        }
    }
}

struct TransferRun {
    outcome: FunnelOutcome,
    estimated_total: u64,
    slices: Vec<SliceReport>,
    failures: Vec<DocumentFailure>,
    fatal: Vec<String>,
}

impl TransferRun {
    fn not_started() -> Self {
        Self {
            outcome: FunnelOutcome::Stopped,
            estimated_total: 0,
            slices: Vec::new(),
            failures: Vec::new(),
            fatal: Vec::new(),
        }
    }

    fn failed_slices(&self) -> usize {
        self.slices
            .iter()
            .filter(|report| matches!(report.outcome, SliceOutcome::Failed(_)))
            .count()
    }
}
