//! In-memory adapters for every port.
//!
//! Used by the test suites and for single-process embedding. The record
//! store keeps one mutex per job, so settlements of one job serialize
//! while independent jobs never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use docshift_core::aggregate::{JobTransition, TaskCounts};
use docshift_core::model::{ArchiveRecord, Job, Task, TaskInvocation, TaskTransition};
use docshift_core::ports::{
    BlobError, BlobStore, Delivery, QueueError, RecordStore, StoreError, TaskQueue,
};
use docshift_core::status::{JobStatus, TaskStatus};
use docshift_core::types::{BlobKey, JobId, TaskId, Timestamp};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".into())
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JobEntry {
    job: Job,
    tasks: Vec<Task>,
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobEntry>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    fn entry(&self, job_id: JobId) -> Result<Option<Arc<Mutex<JobEntry>>>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn entries(&self) -> Result<Vec<Arc<Mutex<JobEntry>>>, StoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.values().cloned().collect())
    }

    /// Collect tasks across all jobs matching `filter`, ordered by `key`.
    fn scan_tasks<F, K>(&self, limit: usize, filter: F, key: K) -> Result<Vec<Task>, StoreError>
    where
        F: Fn(&Task) -> bool,
        K: Fn(&Task) -> Option<Timestamp>,
    {
        let mut found = Vec::new();
        for entry in self.entries()? {
            let entry = entry.lock().map_err(poisoned)?;
            found.extend(entry.tasks.iter().filter(|t| filter(t)).cloned());
        }
        found.sort_by_key(|t| key(t));
        found.truncate(limit);
        Ok(found)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::QueryFailed(format!("duplicate job id {}", job.id)));
        }
        let mut tasks = tasks.to_vec();
        tasks.sort_by_key(|t| t.position);
        jobs.insert(
            job.id,
            Arc::new(Mutex::new(JobEntry {
                job: job.clone(),
                tasks,
            })),
        );
        Ok(())
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        match self.entry(job_id)? {
            Some(entry) => Ok(Some(entry.lock().map_err(poisoned)?.job.clone())),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        match self.entry(job_id)? {
            Some(entry) => Ok(entry.lock().map_err(poisoned)?.tasks.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn find_task(&self, job_id: JobId, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let Some(entry) = self.entry(job_id)? else {
            return Ok(None);
        };
        let entry = entry.lock().map_err(poisoned)?;
        Ok(entry.tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn transition_task(&self, transition: &TaskTransition) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(transition.job_id)? else {
            return Ok(false);
        };
        let mut entry = entry.lock().map_err(poisoned)?;
        match entry.tasks.iter_mut().find(|t| t.id == transition.task_id) {
            Some(task) if transition.applies_to(task) => {
                transition.apply(task, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_enqueued(&self, job_id: JobId, task_id: TaskId, attempts: i32) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(job_id)? else {
            return Ok(false);
        };
        let mut entry = entry.lock().map_err(poisoned)?;
        match entry.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) if task.status == TaskStatus::Pending && task.attempts == attempts => {
                task.enqueued_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recompute_job(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        let entry = self.entry(job_id)?.ok_or(StoreError::JobNotFound(job_id))?;
        let mut entry = entry.lock().map_err(poisoned)?;

        let counts = TaskCounts::from_tasks(&entry.tasks);
        let transition = JobTransition::compute(entry.job.status, counts);
        if transition.changed() {
            entry.job.status = transition.current;
            if transition.current.is_terminal() {
                entry.job.completed_at = Some(Utc::now());
            }
        }
        Ok(transition)
    }

    async fn record_archive(&self, job_id: JobId, record: &ArchiveRecord) -> Result<bool, StoreError> {
        let entry = self.entry(job_id)?.ok_or(StoreError::JobNotFound(job_id))?;
        let mut entry = entry.lock().map_err(poisoned)?;
        let job = &mut entry.job;
        if job.archive_location.is_some() || job.archive_error.is_some() {
            return Ok(false);
        }
        match record {
            ArchiveRecord::Ready(key) => job.archive_location = Some(key.clone()),
            ArchiveRecord::Failed(reason) => job.archive_error = Some(reason.clone()),
        }
        Ok(true)
    }

    async fn stale_pending_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.scan_tasks(
            limit,
            |t| t.status == TaskStatus::Pending && t.enqueued_at < before,
            |t| Some(t.enqueued_at),
        )
    }

    async fn stalled_running_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.scan_tasks(
            limit,
            |t| t.status == TaskStatus::Running && t.started_at.is_some_and(|s| s < before),
            |t| t.started_at,
        )
    }

    async fn unarchived_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let mut found = Vec::new();
        for entry in self.entries()? {
            let entry = entry.lock().map_err(poisoned)?;
            let job = &entry.job;
            if job.status == JobStatus::Completed
                && job.archive_location.is_none()
                && job.archive_error.is_none()
                && job.completed_at.is_some_and(|c| c < before)
            {
                found.push((job.completed_at, job.id));
            }
        }
        found.sort();
        Ok(found.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn unsettled_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let mut found = Vec::new();
        for entry in self.entries()? {
            let entry = entry.lock().map_err(poisoned)?;
            if entry.job.status.is_terminal() || entry.tasks.is_empty() {
                continue;
            }
            if !entry.tasks.iter().all(|t| t.status.is_terminal()) {
                continue;
            }
            let last_finished = entry.tasks.iter().filter_map(|t| t.finished_at).max();
            if last_finished.is_some_and(|f| f < before) {
                found.push((entry.job.created_at, entry.job.id));
            }
        }
        found.sort();
        Ok(found.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    published: usize,
    ready: VecDeque<Delivery>,
    in_flight: HashMap<i64, Delivery>,
}

/// FIFO queue with explicit acknowledgement.
///
/// A received delivery stays in flight until acked; [`redeliver_unacked`]
/// simulates the consumer dying and the broker handing it out again.
///
/// [`redeliver_unacked`]: InMemoryTaskQueue::redeliver_unacked
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every unacknowledged delivery to the front of the queue.
    pub fn redeliver_unacked(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let mut pending: Vec<Delivery> = state.in_flight.drain().map(|(_, d)| d).collect();
        pending.sort_by_key(|d| std::cmp::Reverse(d.id));
        let count = pending.len();
        for delivery in pending {
            state.ready.push_front(delivery);
        }
        count
    }

    /// Deliveries waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Deliveries received but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Total invocations ever published.
    pub fn published(&self) -> usize {
        self.state.lock().map(|s| s.published).unwrap_or(0)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn publish(&self, invocation: &TaskInvocation) -> Result<(), QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::PublishFailed("queue lock poisoned".into()))?;
        state.next_id += 1;
        state.published += 1;
        let delivery = Delivery {
            id: state.next_id,
            invocation: invocation.clone(),
        };
        state.ready.push_back(delivery);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::ReceiveFailed("queue lock poisoned".into()))?;
        let Some(delivery) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(delivery.id, delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::AckFailed("queue lock poisoned".into()))?;
        state.in_flight.remove(&delivery.id);
        Ok(())
    }

    async fn is_outstanding(&self, task_id: TaskId, attempt: i32) -> Result<bool, QueueError> {
        let state = self
            .state
            .lock()
            .map_err(|_| QueueError::LookupFailed("queue lock poisoned".into()))?;
        Ok(state
            .ready
            .iter()
            .chain(state.in_flight.values())
            .any(|d| d.invocation.task_id == task_id && d.invocation.attempt == attempt))
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<BlobKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<BlobKey> {
        let mut keys: Vec<BlobKey> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &BlobKey, bytes: Vec<u8>) -> Result<(), BlobError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| BlobError::WriteFailed("blob store lock poisoned".into()))?;
        objects.insert(key.clone(), bytes);
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobError::ReadFailed("blob store lock poisoned".into()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.clone()))
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobError::ReadFailed("blob store lock poisoned".into()))?;
        Ok(objects.contains_key(key))
    }
}
