use crate::model::TaskInvocation;
use crate::types::TaskId;

/// A received invocation awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue-assigned identifier used for `ack`.
    pub id: i64,
    pub invocation: TaskInvocation,
}

/// At-least-once work queue.
///
/// A delivery that is never acknowledged becomes visible again, so every
/// consumer must tolerate duplicates.
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, invocation: &TaskInvocation) -> Result<(), QueueError>;

    /// Take the next available invocation without blocking.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Whether an invocation of `attempt` for `task_id` is queued or
    /// delivered but not yet acknowledged.
    async fn is_outstanding(&self, task_id: TaskId, attempt: i32) -> Result<bool, QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("ack failed: {0}")]
    AckFailed(String),
    #[error("lookup failed: {0}")]
    LookupFailed(String),
}
