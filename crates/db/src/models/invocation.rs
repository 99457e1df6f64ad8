use docshift_core::error::CoreError;
use docshift_core::model::TaskInvocation;
use docshift_core::ports::Delivery;
use docshift_core::types::{BlobKey, JobId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `task_invocations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvocationRow {
    pub id: i64,
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub content_ref: String,
    pub attempt: i32,
    pub published_at: Timestamp,
    pub leased_until: Option<Timestamp>,
    pub delivery_count: i32,
}

impl TryFrom<InvocationRow> for Delivery {
    type Error = CoreError;

    fn try_from(row: InvocationRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: row.id,
            invocation: TaskInvocation {
                job_id: JobId::from_uuid(row.job_id),
                task_id: TaskId::from_uuid(row.task_id),
                content_ref: BlobKey::parse(row.content_ref)?,
                attempt: row.attempt,
            },
        })
    }
}
