//! Recovery: lost publishes, abandoned attempts, unsettled jobs, missing archives.

mod common;

use assert_matches::assert_matches;
use common::{test_config, tick, unzip, Harness};
use docshift_core::model::TaskTransition;
use docshift_core::naming::output_key;
use docshift_core::ports::{BlobStore, RecordStore, TaskQueue};
use docshift_core::retry::RetryPolicy;
use docshift_core::status::{JobStatus, TaskStatus};
use docshift_core::types::{JobId, TaskId};
use docshift_pipeline::error::WorkerError;
use docshift_pipeline::orchestrator::ArchiveAvailability;
use docshift_pipeline::worker::TaskOutcome;
use docshift_pipeline::OrchestratorError;

/// Receive one delivery and start its attempt, as a worker would just
/// before crashing.
async fn start_and_abandon(h: &Harness) -> (JobId, TaskId) {
    let delivery = h.queue.receive().await.unwrap().unwrap();
    let inv = delivery.invocation;
    let start = TaskTransition::start(inv.job_id, inv.task_id, inv.attempt);
    assert!(h.store.transition_task(&start).await.unwrap());
    (inv.job_id, inv.task_id)
}

#[tokio::test]
async fn unpublished_tasks_are_republished() {
    let h = Harness::new();
    h.queue.fail_publishes(true);
    let job_id = h.submit(&["a.docx", "b.docx"]).await;

    assert!(h.drain().await.is_empty());
    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Pending);
    assert_eq!(report.counts.queued, 2);

    h.queue.fail_publishes(false);
    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.republished, 2);
    assert_eq!(sweep.reclaimed, 0);

    assert_eq!(h.drain().await, [TaskOutcome::Succeeded, TaskOutcome::Succeeded]);
    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.archive, ArchiveAvailability::Ready);
}

#[tokio::test]
async fn abandoned_attempt_is_requeued_and_retried() {
    let h = Harness::new();
    let job_id = h.submit(&["a.docx"]).await;
    let (_, task_id) = start_and_abandon(&h).await;

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.tasks[0].status, TaskStatus::Running);

    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.reclaimed, 1);

    let task = h.store.find_task(job_id, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 1);

    assert_eq!(h.drain().await, [TaskOutcome::Succeeded]);
    let task = h.store.find_task(job_id, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempts, 2);

    // The crashed consumer's delivery comes back and is ignored.
    assert_eq!(h.queue.inner.redeliver_unacked(), 1);
    assert_eq!(h.drain().await, [TaskOutcome::Discarded]);
    assert_eq!(h.converter.calls(), 1);
}

#[tokio::test]
async fn abandoned_last_attempt_fails_the_task() {
    let mut config = test_config();
    config.retry = RetryPolicy::new(1);
    let h = Harness::with_config(config);
    let job_id = h.submit(&["a.docx"]).await;
    start_and_abandon(&h).await;

    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.reclaimed, 1);

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.archive, ArchiveAvailability::NoArchive);
    let error = report.tasks[0].error.as_deref().unwrap();
    assert!(error.starts_with("permanent worker_lost"), "{error}");
    assert!(error.ends_with("(gave up after 1 attempt)"), "{error}");
}

#[tokio::test]
async fn completed_job_without_archive_is_reassembled() {
    let h = Harness::new();
    let job_id = h.submit(&["a.docx"]).await;

    // Settle the task and the job, then crash before assembly.
    let (_, task_id) = start_and_abandon(&h).await;
    let output = output_key(job_id, task_id, "a.docx", "pdf");
    h.blobs.put(&output, b"%PDF".to_vec()).await.unwrap();
    let done = TaskTransition::succeed(job_id, task_id, 1, output);
    assert!(h.store.transition_task(&done).await.unwrap());
    let transition = h.store.recompute_job(job_id).await.unwrap();
    assert!(transition.became_terminal());

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.archive, ArchiveAvailability::Pending);
    assert_matches!(
        h.orchestrator.get_archive(job_id).await,
        Err(OrchestratorError::NotReady(_))
    );

    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.reassembled, 1);

    let archive = h.orchestrator.get_archive(job_id).await.unwrap();
    assert_eq!(unzip(&archive.bytes), [("a.pdf".to_string(), "%PDF".to_string())]);
}

#[tokio::test]
async fn healthy_system_needs_no_repair() {
    let h = Harness::new();
    h.run_job(&["a.docx", "b.docx"]).await;

    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert!(sweep.is_empty(), "{sweep:?}");
    assert_eq!(h.blobs.archive_puts(), 1);
}

#[tokio::test]
async fn redelivery_settles_job_after_failed_recompute() {
    let h = Harness::new();
    let job_id = h.submit(&["a.docx"]).await;

    h.store.fail_settled_recomputes(true);
    let worker = h.orchestrator.worker("test");
    assert_matches!(worker.drain().await, Err(WorkerError::Store(_)));

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.tasks[0].status, TaskStatus::Succeeded);
    assert_eq!(report.status, JobStatus::InProgress);

    h.store.fail_settled_recomputes(false);
    assert_eq!(h.queue.inner.redeliver_unacked(), 1);
    assert_eq!(h.drain().await, [TaskOutcome::Discarded]);

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.archive, ArchiveAvailability::Ready);
    assert_eq!(h.converter.calls(), 1);
}

#[tokio::test]
async fn sweep_settles_job_left_open_by_failed_recompute() {
    let h = Harness::new();
    let job_id = h.submit(&["a.docx", "b.docx"]).await;

    h.store.fail_settled_recomputes(true);
    let worker = h.orchestrator.worker("test");
    assert_eq!(worker.process_next().await.unwrap(), Some(TaskOutcome::Succeeded));
    assert_matches!(worker.process_next().await, Err(WorkerError::Store(_)));
    h.store.fail_settled_recomputes(false);

    // The failed delivery is never redelivered; only the sweep can finish the job.
    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.resettled, 1);
    assert_eq!(sweep.republished, 0);
    assert_eq!(sweep.reclaimed, 0);
    assert_eq!(sweep.reassembled, 0);

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.archive, ArchiveAvailability::Ready);
    assert_eq!(h.blobs.archive_puts(), 1);

    let again = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert!(again.is_empty(), "{again:?}");
}

#[tokio::test]
async fn queued_invocations_are_not_republished() {
    let h = Harness::new();
    h.submit(&["a.docx", "b.docx"]).await;
    assert_eq!(h.queue.inner.ready_len(), 2);

    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert!(sweep.is_empty(), "{sweep:?}");
    assert_eq!(h.queue.inner.published(), 2);
    assert_eq!(h.queue.inner.ready_len(), 2);

    // A delivery held by a slow consumer is just as outstanding.
    let delivery = h.queue.receive().await.unwrap().unwrap();
    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.republished, 0);
    assert_eq!(h.queue.inner.ready_len(), 1);

    h.queue.ack(&delivery).await.unwrap();
    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.republished, 1);
    assert_eq!(h.queue.inner.published(), 3);
}
