//! Archive contents, naming and assembly failures.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{test_config, tick, unzip, FakeConverter, Harness};
use docshift_core::batch::SubmittedFile;
use docshift_core::naming::archive_key;
use docshift_core::ports::BlobStore;
use docshift_core::status::{JobStatus, TaskStatus};
use docshift_core::types::BlobKey;
use docshift_pipeline::memory::{InMemoryRecordStore, InMemoryTaskQueue};
use docshift_pipeline::orchestrator::ArchiveAvailability;
use docshift_pipeline::storage::LocalBlobStore;
use docshift_pipeline::{JobOrchestrator, OrchestratorError};

#[tokio::test]
async fn duplicate_filenames_get_distinct_entries() {
    let h = Harness::new();
    let job_id = h.run_job(&["a.docx", "a.docx", "a.docx"]).await;

    let archive = h.orchestrator.get_archive(job_id).await.unwrap();
    assert_eq!(
        unzip(&archive.bytes),
        [
            ("a.pdf".to_string(), "converted:uploads/0/a.docx".to_string()),
            ("a (2).pdf".to_string(), "converted:uploads/1/a.docx".to_string()),
            ("a (3).pdf".to_string(), "converted:uploads/2/a.docx".to_string()),
        ]
    );

    // Per-file lookup resolves to the first file with that name.
    let first = h.orchestrator.get_file_result(job_id, "a.docx").await.unwrap();
    assert_eq!(first.filename, "a.pdf");
    assert_eq!(first.bytes, b"converted:uploads/0/a.docx");
}

#[tokio::test]
async fn storage_failure_is_recorded_without_touching_tasks() {
    let h = Harness::new();
    h.blobs.fail_archives(true);
    let job_id = h.run_job(&["a.docx", "b.docx"]).await;

    let report = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.archive, ArchiveAvailability::Failed);
    let reason = report.archive_error.clone().unwrap();
    assert!(reason.contains("no space left on device"), "{reason}");
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Succeeded));

    let err = h.orchestrator.get_archive(job_id).await.unwrap_err();
    assert_matches!(err, OrchestratorError::ArchiveFailed { ref reason, .. } if reason.contains("no space"));
    assert_eq!(err.code(), "ARCHIVE_FAILED");

    // Individual results stay downloadable.
    let b = h.orchestrator.get_file_result(job_id, "b.docx").await.unwrap();
    assert_eq!(b.filename, "b.pdf");

    // A recorded failure is final; the sweep does not retry it.
    h.blobs.fail_archives(false);
    tick().await;
    let sweep = h.orchestrator.sweep().sweep_once().await.unwrap();
    assert_eq!(sweep.reassembled, 0);
    assert!(h.blobs.archive_keys().is_empty());
}

#[tokio::test]
async fn archive_is_written_to_the_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
    let converter = Arc::new(FakeConverter::new(blobs.clone()));
    let orchestrator = JobOrchestrator::new(
        test_config(),
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(InMemoryTaskQueue::new()),
        blobs.clone(),
        converter,
    );

    let mut files = Vec::new();
    for name in ["report.docx", "sheet.xlsx"] {
        let key = BlobKey::parse(format!("uploads/{name}")).unwrap();
        blobs.put(&key, name.as_bytes().to_vec()).await.unwrap();
        files.push(SubmittedFile {
            filename: name.to_string(),
            content_ref: key,
            size_bytes: name.len() as u64,
        });
    }
    let job_id = orchestrator.submit_job(&files).await.unwrap();
    orchestrator.worker("local").drain().await.unwrap();

    let path = blobs.resolve(&archive_key(job_id));
    assert!(path.starts_with(dir.path()));
    let on_disk = std::fs::read(&path).unwrap();

    let archive = orchestrator.get_archive(job_id).await.unwrap();
    assert_eq!(archive.bytes, on_disk);
    let names: Vec<String> = unzip(&on_disk).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["report.pdf", "sheet.pdf"]);
}
