//! State aggregator: recomputes a job after its tasks move.

use std::sync::Arc;

use docshift_core::aggregate::JobTransition;
use docshift_core::ports::{RecordStore, StoreError};
use docshift_core::types::{JobId, TaskId};
use tracing::instrument;

use crate::archive::ArchiveAssembler;

pub struct StateAggregator {
    store: Arc<dyn RecordStore>,
    assembler: Arc<ArchiveAssembler>,
}

impl StateAggregator {
    pub fn new(store: Arc<dyn RecordStore>, assembler: Arc<ArchiveAssembler>) -> Self {
        Self { store, assembler }
    }

    /// Refresh the job after one of its tasks started, moving it to
    /// `IN_PROGRESS` on the first start.
    pub async fn on_task_started(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        self.store.recompute_job(job_id).await
    }

    /// Recompute the job after a task reached a terminal status.
    ///
    /// The recomputation is one atomic step in the store, so of several
    /// racing settlements exactly one observes the terminal transition; that
    /// one runs the assembler. Assembly errors are recorded on the job by
    /// the assembler and only logged here.
    #[instrument(skip(self), fields(job_id = %job_id, task_id = %task_id))]
    pub async fn on_task_settled(&self, job_id: JobId, task_id: TaskId) -> Result<JobTransition, StoreError> {
        self.settle(job_id).await
    }

    /// Recompute a job whose tasks have all settled but whose own status
    /// was never brought up to date.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn resettle(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        self.settle(job_id).await
    }

    async fn settle(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        let transition = self.store.recompute_job(job_id).await?;

        if transition.became_terminal() {
            tracing::info!(
                status = %transition.current,
                succeeded = transition.counts.succeeded,
                failed = transition.counts.failed,
                "Job reached terminal status",
            );
            if let Err(e) = self.assembler.assemble(job_id).await {
                tracing::warn!(error = %e, "Archive not produced for terminal job");
            }
        }

        Ok(transition)
    }
}
