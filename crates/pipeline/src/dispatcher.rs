//! Task dispatcher: admits a batch and fans it out onto the queue.

use std::sync::Arc;

use docshift_core::batch::{validate_batch, BatchLimits, SubmittedFile};
use docshift_core::model::{Job, TaskInvocation};
use docshift_core::ports::{RecordStore, TaskQueue};
use docshift_core::types::JobId;
use tracing::instrument;

use crate::error::OrchestratorError;

pub struct TaskDispatcher {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    limits: BatchLimits,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn TaskQueue>, limits: BatchLimits) -> Self {
        Self {
            store,
            queue,
            limits,
        }
    }

    /// Validate `files`, persist one job with one pending task per file,
    /// then publish one invocation per task.
    ///
    /// Nothing is written if validation fails. Records are durable before
    /// anything is published; a failed publish leaves its task `PENDING`
    /// for the recovery sweep and does not fail the submission.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn submit(&self, files: &[SubmittedFile]) -> Result<JobId, OrchestratorError> {
        validate_batch(files, &self.limits)?;

        let (job, tasks) = Job::from_batch(files);
        self.store.create_job(&job, &tasks).await?;

        let mut unpublished = 0usize;
        for task in &tasks {
            if let Err(e) = self.queue.publish(&TaskInvocation::next_for(task)).await {
                unpublished += 1;
                tracing::warn!(
                    job_id = %job.id,
                    task_id = %task.id,
                    error = %e,
                    "Failed to publish task invocation; left for recovery sweep",
                );
            }
        }

        tracing::info!(
            job_id = %job.id,
            tasks = tasks.len(),
            unpublished,
            "Job submitted",
        );
        Ok(job.id)
    }
}
