//! Shared fixtures: a scripted converter, fault-injecting adapters and an
//! orchestrator wired over the in-memory ports.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docshift_core::aggregate::JobTransition;
use docshift_core::batch::{BatchLimits, SubmittedFile};
use docshift_core::model::{ArchiveRecord, Job, Task, TaskInvocation, TaskTransition};
use docshift_core::ports::{
    BlobError, BlobStore, ConversionRequest, Converter, Delivery, QueueError, RecordStore,
    StoreError, TaskQueue,
};
use docshift_core::retry::{ConversionError, RetryPolicy};
use docshift_core::types::{BlobKey, JobId, TaskId, Timestamp};
use docshift_pipeline::memory::{InMemoryBlobStore, InMemoryRecordStore, InMemoryTaskQueue};
use docshift_pipeline::worker::TaskOutcome;
use docshift_pipeline::{JobOrchestrator, PipelineConfig};

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// One scripted conversion attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(ConversionError),
    /// Never returns; the worker's timeout fires.
    Hang,
}

/// Converter whose behaviour is scripted per filename. Unscripted
/// attempts succeed, writing `converted:<input key>` to the output key.
pub struct FakeConverter {
    blobs: Arc<dyn BlobStore>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: AtomicUsize,
}

impl FakeConverter {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, filename: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(filename.to_string(), steps.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, request: &ConversionRequest) -> Result<BlobKey, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.filename)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Succeed);

        tokio::task::yield_now().await;
        match step {
            Step::Succeed => {
                let body = format!("converted:{}", request.input);
                self.blobs
                    .put(&request.output, body.into_bytes())
                    .await
                    .map_err(|e| ConversionError::unclassified(e.to_string()))?;
                Ok(request.output.clone())
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Fault-injecting adapters
// ---------------------------------------------------------------------------

/// In-memory queue whose publishes can be made to fail.
#[derive(Default)]
pub struct FlakyQueue {
    pub inner: InMemoryTaskQueue,
    fail_publish: AtomicBool,
}

impl FlakyQueue {
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn publish(&self, invocation: &TaskInvocation) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::PublishFailed("broker unreachable".into()));
        }
        self.inner.publish(invocation).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        self.inner.receive().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.ack(delivery).await
    }

    async fn is_outstanding(&self, task_id: TaskId, attempt: i32) -> Result<bool, QueueError> {
        self.inner.is_outstanding(task_id, attempt).await
    }
}

/// In-memory record store that can refuse to recompute jobs whose tasks
/// have all settled, as a store outage right after the last settlement would.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryRecordStore,
    fail_settled_recompute: AtomicBool,
}

impl FlakyStore {
    pub fn fail_settled_recomputes(&self, fail: bool) {
        self.fail_settled_recompute.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError> {
        self.inner.create_job(job, tasks).await
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.find_job(job_id).await
    }

    async fn list_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks(job_id).await
    }

    async fn find_task(&self, job_id: JobId, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.find_task(job_id, task_id).await
    }

    async fn transition_task(&self, transition: &TaskTransition) -> Result<bool, StoreError> {
        self.inner.transition_task(transition).await
    }

    async fn mark_enqueued(&self, job_id: JobId, task_id: TaskId, attempts: i32) -> Result<bool, StoreError> {
        self.inner.mark_enqueued(job_id, task_id, attempts).await
    }

    async fn recompute_job(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        if self.fail_settled_recompute.load(Ordering::SeqCst) {
            let tasks = self.inner.list_tasks(job_id).await?;
            if tasks.iter().all(|t| t.status.is_terminal()) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
        }
        self.inner.recompute_job(job_id).await
    }

    async fn record_archive(&self, job_id: JobId, record: &ArchiveRecord) -> Result<bool, StoreError> {
        self.inner.record_archive(job_id, record).await
    }

    async fn stale_pending_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.inner.stale_pending_tasks(before, limit).await
    }

    async fn stalled_running_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.inner.stalled_running_tasks(before, limit).await
    }

    async fn unarchived_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        self.inner.unarchived_jobs(before, limit).await
    }

    async fn unsettled_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        self.inner.unsettled_jobs(before, limit).await
    }
}

/// In-memory blob store that counts archive writes and can refuse them.
#[derive(Default)]
pub struct CountingBlobs {
    pub inner: InMemoryBlobStore,
    archive_puts: AtomicUsize,
    fail_archives: AtomicBool,
}

impl CountingBlobs {
    pub fn archive_puts(&self) -> usize {
        self.archive_puts.load(Ordering::SeqCst)
    }

    pub fn fail_archives(&self, fail: bool) {
        self.fail_archives.store(fail, Ordering::SeqCst);
    }

    pub fn archive_keys(&self) -> Vec<BlobKey> {
        self.inner
            .keys()
            .into_iter()
            .filter(|k| k.as_str().starts_with("archives/"))
            .collect()
    }
}

#[async_trait]
impl BlobStore for CountingBlobs {
    async fn put(&self, key: &BlobKey, bytes: Vec<u8>) -> Result<(), BlobError> {
        if key.as_str().starts_with("archives/") {
            if self.fail_archives.load(Ordering::SeqCst) {
                return Err(BlobError::WriteFailed("no space left on device".into()));
            }
            self.archive_puts.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobError> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError> {
        self.inner.exists(key).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Fast settings: short timeout, no grace periods, small batches.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        limits: BatchLimits {
            max_files: 50,
            max_file_size: 1024,
        },
        retry: RetryPolicy::new(2),
        conversion_timeout: Duration::from_millis(200),
        worker_concurrency: 3,
        poll_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(50),
        pending_grace: Duration::ZERO,
        stall_grace: Duration::ZERO,
        queue_lease: Duration::from_secs(1),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub store: Arc<FlakyStore>,
    pub queue: Arc<FlakyQueue>,
    pub blobs: Arc<CountingBlobs>,
    pub converter: Arc<FakeConverter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let store = Arc::new(FlakyStore::default());
        let queue = Arc::new(FlakyQueue::default());
        let blobs = Arc::new(CountingBlobs::default());
        let converter = Arc::new(FakeConverter::new(blobs.clone()));
        let orchestrator = JobOrchestrator::new(
            config,
            store.clone(),
            queue.clone(),
            blobs.clone(),
            converter.clone(),
        );
        Self {
            orchestrator,
            store,
            queue,
            blobs,
            converter,
        }
    }

    /// Upload one small input per name and describe them as a batch.
    pub async fn upload(&self, names: &[&str]) -> Vec<SubmittedFile> {
        let mut files = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let key = BlobKey::parse(format!("uploads/{i}/{name}")).unwrap();
            self.blobs.put(&key, name.as_bytes().to_vec()).await.unwrap();
            files.push(SubmittedFile {
                filename: name.to_string(),
                content_ref: key,
                size_bytes: name.len() as u64,
            });
        }
        files
    }

    pub async fn submit(&self, names: &[&str]) -> JobId {
        let files = self.upload(names).await;
        self.orchestrator.submit_job(&files).await.unwrap()
    }

    /// Process everything currently queued with a single worker.
    pub async fn drain(&self) -> Vec<TaskOutcome> {
        self.orchestrator.worker("test").drain().await.unwrap()
    }

    /// Submit `names` and process the queue to exhaustion.
    pub async fn run_job(&self, names: &[&str]) -> JobId {
        let job_id = self.submit(names).await;
        self.drain().await;
        job_id
    }
}

/// Entry names and contents of a ZIP archive, in archive order.
pub fn unzip(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

/// Let timestamps move past a zero grace period.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
