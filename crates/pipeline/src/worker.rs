//! Conversion worker: takes one invocation at a time off the queue and
//! carries its task to an outcome.

use std::sync::Arc;
use std::time::Duration;

use docshift_core::model::{Task, TaskInvocation, TaskTransition};
use docshift_core::naming::output_key;
use docshift_core::ports::{ConversionRequest, Converter, RecordStore, TaskQueue};
use docshift_core::retry::{ConversionError, RetryDecision, RetryPolicy, TaskError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::aggregator::StateAggregator;
use crate::error::WorkerError;

/// What happened to one delivered invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    /// Transient failure; the next attempt was published.
    Requeued,
    /// Duplicate, stale or orphaned invocation; nothing changed.
    Discarded,
}

pub struct ConversionWorker {
    name: String,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    converter: Arc<dyn Converter>,
    aggregator: Arc<StateAggregator>,
    retry: RetryPolicy,
    timeout: Duration,
    poll_interval: Duration,
    output_extension: String,
}

impl ConversionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
        converter: Arc<dyn Converter>,
        aggregator: Arc<StateAggregator>,
        retry: RetryPolicy,
        timeout: Duration,
        poll_interval: Duration,
        output_extension: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            queue,
            converter,
            aggregator,
            retry,
            timeout,
            poll_interval,
            output_extension: output_extension.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// Each tick drains the queue; an in-flight conversion is allowed to
    /// finish (bounded by the conversion timeout) before shutdown.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            worker = %self.name,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Conversion worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker = %self.name, "Conversion worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    while !cancel.is_cancelled() {
                        match self.process_next().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(worker = %self.name, error = %e, "Worker cycle failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Process invocations until the queue is empty.
    pub async fn drain(&self) -> Result<Vec<TaskOutcome>, WorkerError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Receive and handle one invocation. `Ok(None)` means the queue was empty.
    ///
    /// The delivery is acknowledged only after its outcome is recorded; on
    /// error it stays unacknowledged and will be delivered again.
    pub async fn process_next(&self) -> Result<Option<TaskOutcome>, WorkerError> {
        let Some(delivery) = self.queue.receive().await? else {
            return Ok(None);
        };

        let inv = &delivery.invocation;
        let span = tracing::info_span!(
            "task",
            worker = %self.name,
            job_id = %inv.job_id,
            task_id = %inv.task_id,
            attempt = inv.attempt,
        );
        let outcome = self.process(inv).instrument(span).await?;

        self.queue.ack(&delivery).await?;
        Ok(Some(outcome))
    }

    async fn process(&self, inv: &TaskInvocation) -> Result<TaskOutcome, WorkerError> {
        let Some(task) = self.store.find_task(inv.job_id, inv.task_id).await? else {
            tracing::warn!("Invocation for unknown task, discarding");
            return Ok(TaskOutcome::Discarded);
        };

        let start = TaskTransition::start(inv.job_id, inv.task_id, inv.attempt);
        if !self.store.transition_task(&start).await? {
            tracing::debug!(
                status = %task.status,
                attempts = task.attempts,
                "Duplicate or stale invocation, discarding",
            );
            if task.status.is_terminal() {
                // The delivery that settled it may have failed before the
                // job was recomputed.
                self.aggregator.on_task_settled(task.job_id, task.id).await?;
            }
            return Ok(TaskOutcome::Discarded);
        }
        self.aggregator.on_task_started(inv.job_id).await?;

        let request = ConversionRequest {
            input: task.content_ref.clone(),
            output: output_key(task.job_id, task.id, &task.filename, &self.output_extension),
            filename: task.filename.clone(),
        };
        tracing::debug!(filename = %task.filename, "Converting");

        let result = match tokio::time::timeout(self.timeout, self.converter.convert(&request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ConversionError::timeout(format!(
                "no result within {}s",
                self.timeout.as_secs()
            ))),
        };

        let outcome = match result {
            Ok(output) => {
                let done = TaskTransition::succeed(task.job_id, task.id, inv.attempt, output);
                if self.store.transition_task(&done).await? {
                    tracing::info!(filename = %task.filename, "Task succeeded");
                    TaskOutcome::Succeeded
                } else {
                    tracing::warn!("Task was reclaimed while converting; result dropped");
                    TaskOutcome::Discarded
                }
            }
            Err(err) => {
                settle_failure(self.store.as_ref(), self.queue.as_ref(), &self.retry, &task, inv.attempt, &err)
                    .await?
            }
        };

        if matches!(outcome, TaskOutcome::Succeeded | TaskOutcome::Failed) {
            self.aggregator.on_task_settled(task.job_id, task.id).await?;
        }
        Ok(outcome)
    }
}

/// Apply the retry policy to a failed `attempt` of `task`.
///
/// Requeues (and publishes the next attempt) while the budget lasts,
/// otherwise records a permanent failure. Returns `Discarded` if the task
/// is no longer `RUNNING` at `attempt`. Shared with the recovery sweep.
pub(crate) async fn settle_failure(
    store: &dyn RecordStore,
    queue: &dyn TaskQueue,
    retry: &RetryPolicy,
    task: &Task,
    attempt: i32,
    err: &ConversionError,
) -> Result<TaskOutcome, WorkerError> {
    match retry.decide(attempt, err.class()) {
        RetryDecision::Requeue { next_attempt } => {
            let requeue = TaskTransition::requeue(task.job_id, task.id, attempt);
            if !store.transition_task(&requeue).await? {
                return Ok(TaskOutcome::Discarded);
            }
            let next = TaskInvocation {
                job_id: task.job_id,
                task_id: task.id,
                content_ref: task.content_ref.clone(),
                attempt: next_attempt,
            };
            if let Err(e) = queue.publish(&next).await {
                tracing::warn!(error = %e, "Failed to publish retry; left for recovery sweep");
            }
            tracing::info!(next_attempt, error = %err, "Transient failure, task requeued");
            Ok(TaskOutcome::Requeued)
        }
        RetryDecision::Fail => {
            let error = TaskError::final_failure(err, attempt);
            let fail = TaskTransition::fail(task.job_id, task.id, attempt, error);
            if !store.transition_task(&fail).await? {
                return Ok(TaskOutcome::Discarded);
            }
            tracing::warn!(filename = %task.filename, error = %err, "Task failed");
            Ok(TaskOutcome::Failed)
        }
    }
}
