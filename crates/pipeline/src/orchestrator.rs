//! Job orchestrator: the composition root.
//!
//! Owns the dispatcher, aggregator and assembler, builds workers and the
//! recovery sweep, and exposes the four caller-facing operations.

use std::sync::Arc;

use docshift_core::aggregate::TaskCounts;
use docshift_core::batch::SubmittedFile;
use docshift_core::model::Job;
use docshift_core::naming::archive_filename;
use docshift_core::ports::{BlobStore, Converter, RecordStore, TaskQueue};
use docshift_core::status::{JobStatus, TaskStatus};
use docshift_core::types::{JobId, TaskId, Timestamp};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::aggregator::StateAggregator;
use crate::archive::ArchiveAssembler;
use crate::config::PipelineConfig;
use crate::dispatcher::TaskDispatcher;
use crate::error::OrchestratorError;
use crate::sweep::RecoverySweep;
use crate::worker::ConversionWorker;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Whether a job's archive can be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveAvailability {
    /// The job is still running, or its archive is being assembled.
    Pending,
    Ready,
    /// Every task failed; no archive will exist.
    NoArchive,
    /// Assembly failed; see `archive_error`.
    Failed,
}

impl ArchiveAvailability {
    fn of(job: &Job) -> Self {
        match job.status {
            JobStatus::Pending | JobStatus::InProgress => ArchiveAvailability::Pending,
            JobStatus::Failed => ArchiveAvailability::NoArchive,
            JobStatus::Completed if job.archive_location.is_some() => ArchiveAvailability::Ready,
            JobStatus::Completed if job.archive_error.is_some() => ArchiveAvailability::Failed,
            JobStatus::Completed => ArchiveAvailability::Pending,
        }
    }
}

/// Per-file entry of a [`JobStatusReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub filename: String,
    pub status: TaskStatus,
    pub attempts: i32,
    /// Human-readable error descriptor of a failed task.
    pub error: Option<String>,
    pub result_available: bool,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub counts: TaskCounts,
    /// Tasks in submission order.
    pub tasks: Vec<TaskReport>,
    pub archive: ArchiveAvailability,
    pub archive_error: Option<String>,
}

/// Bytes handed back to a caller with the name to download them as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct JobOrchestrator {
    config: PipelineConfig,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    blobs: Arc<dyn BlobStore>,
    converter: Arc<dyn Converter>,
    dispatcher: TaskDispatcher,
    assembler: Arc<ArchiveAssembler>,
    aggregator: Arc<StateAggregator>,
}

impl JobOrchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
        blobs: Arc<dyn BlobStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let dispatcher = TaskDispatcher::new(Arc::clone(&store), Arc::clone(&queue), config.limits);
        let assembler = Arc::new(ArchiveAssembler::new(Arc::clone(&store), Arc::clone(&blobs)));
        let aggregator = Arc::new(StateAggregator::new(Arc::clone(&store), Arc::clone(&assembler)));
        Self {
            config,
            store,
            queue,
            blobs,
            converter,
            dispatcher,
            assembler,
            aggregator,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Admit a batch. See [`TaskDispatcher::submit`].
    pub async fn submit_job(&self, files: &[SubmittedFile]) -> Result<JobId, OrchestratorError> {
        self.dispatcher.submit(files).await
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_job_status(&self, job_id: JobId) -> Result<JobStatusReport, OrchestratorError> {
        let job = self.load_job(job_id).await?;
        let tasks = self.store.list_tasks(job_id).await?;

        Ok(JobStatusReport {
            job_id,
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            counts: TaskCounts::from_tasks(&tasks),
            tasks: tasks
                .into_iter()
                .map(|t| TaskReport {
                    task_id: t.id,
                    result_available: t.status == TaskStatus::Succeeded && t.output_location.is_some(),
                    error: t.error.as_ref().map(|e| e.describe()),
                    filename: t.filename,
                    status: t.status,
                    attempts: t.attempts,
                })
                .collect(),
            archive: ArchiveAvailability::of(&job),
            archive_error: job.archive_error,
        })
    }

    /// Download the job's archive.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_archive(&self, job_id: JobId) -> Result<Download, OrchestratorError> {
        let job = self.load_job(job_id).await?;
        match ArchiveAvailability::of(&job) {
            ArchiveAvailability::Pending => Err(OrchestratorError::NotReady(job_id)),
            ArchiveAvailability::NoArchive => Err(OrchestratorError::NoArchive(job_id)),
            ArchiveAvailability::Failed => Err(OrchestratorError::ArchiveFailed {
                job_id,
                reason: job.archive_error.unwrap_or_default(),
            }),
            ArchiveAvailability::Ready => {
                let key = job
                    .archive_location
                    .ok_or(OrchestratorError::NotReady(job_id))?;
                Ok(Download {
                    filename: archive_filename(job_id),
                    bytes: self.blobs.get(&key).await?,
                })
            }
        }
    }

    /// Download the converted result of one file.
    ///
    /// With duplicate filenames in a batch, the first in submission order
    /// is the one returned.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_file_result(&self, job_id: JobId, filename: &str) -> Result<Download, OrchestratorError> {
        self.load_job(job_id).await?;
        let task = self
            .store
            .list_tasks(job_id)
            .await?
            .into_iter()
            .find(|t| t.filename == filename)
            .ok_or_else(|| OrchestratorError::FileNotFound {
                job_id,
                filename: filename.to_string(),
            })?;

        match (task.status, task.output_location) {
            (TaskStatus::Succeeded, Some(output)) => Ok(Download {
                filename: output.file_name().to_string(),
                bytes: self.blobs.get(&output).await?,
            }),
            (TaskStatus::Failed, _) => Err(OrchestratorError::FileFailed {
                job_id,
                filename: task.filename,
                error: task
                    .error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "unknown error".into()),
            }),
            _ => Err(OrchestratorError::FileNotReady {
                job_id,
                filename: task.filename,
            }),
        }
    }

    /// Build a conversion worker sharing this orchestrator's collaborators.
    pub fn worker(&self, name: impl Into<String>) -> ConversionWorker {
        ConversionWorker::new(
            name,
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::clone(&self.converter),
            Arc::clone(&self.aggregator),
            self.config.retry,
            self.config.conversion_timeout,
            self.config.poll_interval,
            self.config.output_extension.clone(),
        )
    }

    pub fn sweep(&self) -> RecoverySweep {
        RecoverySweep::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::clone(&self.aggregator),
            Arc::clone(&self.assembler),
            self.config.retry,
            self.config.pending_grace,
            self.config.stall_grace,
            self.config.sweep_interval,
        )
    }

    /// Start `worker_concurrency` worker loops and one sweep loop.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for i in 0..self.config.worker_concurrency {
            let worker = self.worker(format!("worker-{i}"));
            let cancel = cancel.clone();
            set.spawn(async move { worker.run(cancel).await });
        }
        let sweep = self.sweep();
        set.spawn(async move { sweep.run(cancel).await });
        set
    }

    async fn load_job(&self, job_id: JobId) -> Result<Job, OrchestratorError> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }
}
