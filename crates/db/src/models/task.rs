use docshift_core::error::CoreError;
use docshift_core::model::Task;
use docshift_core::retry::TaskError;
use docshift_core::status::{StatusId, TaskStatus};
use docshift_core::types::{BlobKey, JobId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub position: i32,
    pub filename: String,
    pub content_ref: String,
    pub size_bytes: i64,
    pub status_id: StatusId,
    pub attempts: i32,
    pub output_location: Option<String>,
    pub error_class: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub enqueued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        // The three error columns are written together; a message alone is
        // enough to rebuild the descriptor.
        let error = row.error_message.map(|message| {
            TaskError::from_parts(
                row.error_class.as_deref().unwrap_or_default(),
                row.error_kind.as_deref().unwrap_or_default(),
                message,
            )
        });

        Ok(Task {
            id: TaskId::from_uuid(row.id),
            job_id: JobId::from_uuid(row.job_id),
            position: row.position,
            filename: row.filename,
            content_ref: BlobKey::parse(row.content_ref)?,
            size_bytes: u64::try_from(row.size_bytes).map_err(|_| {
                CoreError::Validation(format!("negative size_bytes {}", row.size_bytes))
            })?,
            status: TaskStatus::from_id(row.status_id)?,
            attempts: row.attempts,
            output_location: row.output_location.map(BlobKey::parse).transpose()?,
            error,
            enqueued_at: row.enqueued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// `(status_id, attempts)` projection used to recount a job.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct TaskStatusRow {
    pub status_id: StatusId,
    pub attempts: i32,
}
