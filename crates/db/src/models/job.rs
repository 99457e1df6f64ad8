use docshift_core::error::CoreError;
use docshift_core::model::Job;
use docshift_core::status::{JobStatus, StatusId};
use docshift_core::types::{BlobKey, JobId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: Uuid,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub archive_location: Option<String>,
    pub archive_error: Option<String>,
    pub updated_at: Timestamp,
}

impl JobRow {
    /// Build the domain entity; `task_ids` come from a separate query.
    pub fn into_job(self, task_ids: Vec<TaskId>) -> Result<Job, CoreError> {
        Ok(Job {
            id: JobId::from_uuid(self.id),
            status: JobStatus::from_id(self.status_id)?,
            created_at: self.created_at,
            completed_at: self.completed_at,
            task_ids,
            archive_location: self.archive_location.map(BlobKey::parse).transpose()?,
            archive_error: self.archive_error,
        })
    }
}
