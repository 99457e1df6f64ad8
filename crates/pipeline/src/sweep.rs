//! Recovery sweep.
//!
//! Repairs what a crash or an unavailable collaborator can leave behind:
//! tasks whose invocation was never published, tasks whose worker died
//! mid-conversion, jobs whose last settlement failed to update them, and
//! completed jobs whose archive was never recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docshift_core::model::TaskInvocation;
use docshift_core::ports::{RecordStore, TaskQueue};
use docshift_core::retry::{ConversionError, ConversionErrorKind, RetryPolicy};
use docshift_core::types::Timestamp;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::aggregator::StateAggregator;
use crate::archive::ArchiveAssembler;
use crate::error::WorkerError;
use crate::worker::{settle_failure, TaskOutcome};

/// Maximum rows handled per category in one cycle.
const SWEEP_BATCH: usize = 100;

/// What one sweep cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending tasks whose invocation was published again.
    pub republished: usize,
    /// Running tasks presumed abandoned and requeued or failed.
    pub reclaimed: usize,
    /// Open jobs with every task settled that were recomputed.
    pub resettled: usize,
    /// Completed jobs whose archive was assembled.
    pub reassembled: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct RecoverySweep {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    aggregator: Arc<StateAggregator>,
    assembler: Arc<ArchiveAssembler>,
    retry: RetryPolicy,
    pending_grace: Duration,
    stall_grace: Duration,
    interval: Duration,
}

impl RecoverySweep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
        aggregator: Arc<StateAggregator>,
        assembler: Arc<ArchiveAssembler>,
        retry: RetryPolicy,
        pending_grace: Duration,
        stall_grace: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            aggregator,
            assembler,
            retry,
            pending_grace,
            stall_grace,
            interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            pending_grace_secs = self.pending_grace.as_secs(),
            stall_grace_secs = self.stall_grace.as_secs(),
            "Recovery sweep started",
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; the first sweep waits a full interval.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Recovery sweep stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.is_empty() => {
                            tracing::debug!("Recovery sweep: nothing to repair");
                        }
                        Ok(report) => {
                            tracing::info!(
                                republished = report.republished,
                                reclaimed = report.reclaimed,
                                resettled = report.resettled,
                                reassembled = report.reassembled,
                                "Recovery sweep repaired work",
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Recovery sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// One sweep cycle.
    pub async fn sweep_once(&self) -> Result<SweepReport, WorkerError> {
        let now = Utc::now();
        Ok(SweepReport {
            republished: self.republish_stale(cutoff(now, self.pending_grace)).await?,
            reclaimed: self.reclaim_stalled(cutoff(now, self.stall_grace)).await?,
            resettled: self.resettle(cutoff(now, self.pending_grace)).await?,
            reassembled: self.reassemble(cutoff(now, self.pending_grace)).await?,
        })
    }

    /// Publish a fresh invocation for every task pending since before
    /// `before` whose next attempt is not already waiting in the queue.
    ///
    /// If the original invocation is merely slow rather than lost, the
    /// duplicate fails the conditional start and is discarded.
    async fn republish_stale(&self, before: Timestamp) -> Result<usize, WorkerError> {
        let mut republished = 0;
        for task in self.store.stale_pending_tasks(before, SWEEP_BATCH).await? {
            match self.queue.is_outstanding(task.id, task.attempts + 1).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Queue lookup failed, republishing");
                }
            }
            if let Err(e) = self.queue.publish(&TaskInvocation::next_for(&task)).await {
                tracing::warn!(task_id = %task.id, error = %e, "Republish failed");
                continue;
            }
            self.store
                .mark_enqueued(task.job_id, task.id, task.attempts)
                .await?;
            tracing::info!(
                job_id = %task.job_id,
                task_id = %task.id,
                attempt = task.attempts + 1,
                "Republished stale pending task",
            );
            republished += 1;
        }
        Ok(republished)
    }

    /// Treat tasks running since before `before` as lost by their worker.
    async fn reclaim_stalled(&self, before: Timestamp) -> Result<usize, WorkerError> {
        let mut reclaimed = 0;
        for task in self.store.stalled_running_tasks(before, SWEEP_BATCH).await? {
            let err = ConversionError::new(
                ConversionErrorKind::WorkerLost,
                format!("no result for attempt {} within {}s", task.attempts, self.stall_grace.as_secs()),
            );
            let outcome = settle_failure(
                self.store.as_ref(),
                self.queue.as_ref(),
                &self.retry,
                &task,
                task.attempts,
                &err,
            )
            .await?;

            match outcome {
                TaskOutcome::Discarded => continue,
                TaskOutcome::Failed => {
                    self.aggregator.on_task_settled(task.job_id, task.id).await?;
                }
                TaskOutcome::Requeued | TaskOutcome::Succeeded => {}
            }
            tracing::warn!(
                job_id = %task.job_id,
                task_id = %task.id,
                outcome = ?outcome,
                "Reclaimed stalled task",
            );
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// Recompute open jobs whose tasks all settled before `before`.
    ///
    /// A recomputation that fails after the last task settled leaves the
    /// job open with nothing left to move it.
    async fn resettle(&self, before: Timestamp) -> Result<usize, WorkerError> {
        let mut resettled = 0;
        for job_id in self.store.unsettled_jobs(before, SWEEP_BATCH).await? {
            match self.aggregator.resettle(job_id).await {
                Ok(transition) if transition.became_terminal() => resettled += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Job recomputation failed"),
            }
        }
        Ok(resettled)
    }

    /// Assemble archives for completed jobs that never recorded one.
    async fn reassemble(&self, before: Timestamp) -> Result<usize, WorkerError> {
        let mut reassembled = 0;
        for job_id in self.store.unarchived_jobs(before, SWEEP_BATCH).await? {
            match self.assembler.assemble(job_id).await {
                Ok(Some(_)) => reassembled += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Re-assembly failed"),
            }
        }
        Ok(reassembled)
    }
}

fn cutoff(now: Timestamp, grace: Duration) -> Timestamp {
    chrono::Duration::from_std(grace)
        .ok()
        .and_then(|grace| now.checked_sub_signed(grace))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
