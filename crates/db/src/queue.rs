//! [`TaskQueue`] on the `task_invocations` table.
//!
//! A received row is leased rather than removed; if the consumer dies
//! before acknowledging, the lease expires and the row is delivered again.

use std::time::Duration;

use async_trait::async_trait;
use docshift_core::model::TaskInvocation;
use docshift_core::ports::{Delivery, QueueError, TaskQueue};
use docshift_core::types::TaskId;
use sqlx::PgPool;
use tracing::instrument;

use crate::repositories::InvocationRepo;

pub struct PgTaskQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    #[instrument(skip(self, invocation), fields(task_id = %invocation.task_id, attempt = invocation.attempt))]
    async fn publish(&self, invocation: &TaskInvocation) -> Result<(), QueueError> {
        InvocationRepo::insert(&self.pool, invocation)
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let Some(row) = InvocationRepo::claim_next(&self.pool, self.lease)
            .await
            .map_err(|e| QueueError::ReceiveFailed(e.to_string()))?
        else {
            return Ok(None);
        };

        if row.delivery_count > 1 {
            tracing::debug!(
                delivery_id = row.id,
                delivery_count = row.delivery_count,
                "Redelivering invocation after lease expiry",
            );
        }

        let id = row.id;
        match Delivery::try_from(row) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                // An unparseable row would be redelivered forever.
                tracing::error!(delivery_id = id, error = %e, "Dropping corrupt invocation");
                InvocationRepo::delete(&self.pool, id)
                    .await
                    .map_err(|e| QueueError::ReceiveFailed(e.to_string()))?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        InvocationRepo::delete(&self.pool, delivery.id)
            .await
            .map_err(|e| QueueError::AckFailed(e.to_string()))?;
        Ok(())
    }

    async fn is_outstanding(&self, task_id: TaskId, attempt: i32) -> Result<bool, QueueError> {
        InvocationRepo::exists(&self.pool, task_id.as_uuid(), attempt)
            .await
            .map_err(|e| QueueError::LookupFailed(e.to_string()))
    }
}
