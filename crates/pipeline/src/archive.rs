//! Archive assembler: packages every successful output of a settled job
//! into one ZIP named from the job id.

use std::io::{Cursor, Write};
use std::sync::Arc;

use docshift_core::model::ArchiveRecord;
use docshift_core::naming::{archive_key, EntryNames};
use docshift_core::ports::{BlobStore, RecordStore};
use docshift_core::status::TaskStatus;
use docshift_core::types::{BlobKey, JobId};
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

pub struct ArchiveAssembler {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ArchiveAssembler {
    pub fn new(store: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Build and record the archive for `job_id`.
    ///
    /// Returns `Ok(None)` when no task succeeded; nothing is written in that
    /// case. Refuses to run while any task is unsettled. Storage and
    /// packaging failures are recorded on the job before being returned.
    ///
    /// Safe to run more than once: the archive key is deterministic, so a
    /// second run overwrites the same object, and only the first recorded
    /// outcome is kept.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn assemble(&self, job_id: JobId) -> Result<Option<BlobKey>, ArchiveError> {
        let job = self
            .store
            .find_job(job_id)
            .await?
            .ok_or(ArchiveError::JobNotFound(job_id))?;
        if let Some(location) = job.archive_location {
            return Ok(Some(location));
        }

        let tasks = self.store.list_tasks(job_id).await?;
        let unsettled = tasks.iter().filter(|t| !t.status.is_terminal()).count();
        if unsettled > 0 {
            return Err(ArchiveError::NotSettled { job_id, unsettled });
        }

        let outputs: Vec<BlobKey> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .filter_map(|t| t.output_location.clone())
            .collect();
        if outputs.is_empty() {
            tracing::info!("No successful outputs; no archive produced");
            return Ok(None);
        }

        match self.build_and_store(job_id, &outputs).await {
            Ok(key) => {
                let recorded = self
                    .store
                    .record_archive(job_id, &ArchiveRecord::Ready(key.clone()))
                    .await?;
                tracing::info!(archive = %key, entries = outputs.len(), recorded, "Archive assembled");
                Ok(Some(key))
            }
            Err(e) => {
                tracing::error!(error = %e, "Archive assembly failed");
                self.store
                    .record_archive(job_id, &ArchiveRecord::Failed(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn build_and_store(&self, job_id: JobId, outputs: &[BlobKey]) -> Result<BlobKey, ArchiveError> {
        let mut names = EntryNames::new();
        let mut entries = Vec::with_capacity(outputs.len());
        for output in outputs {
            let bytes = self.blobs.get(output).await?;
            entries.push((names.allocate(output.file_name()), bytes));
        }

        let archive = tokio::task::spawn_blocking(move || build_zip(entries)).await??;

        let key = archive_key(job_id);
        self.blobs.put(&key, archive).await?;
        Ok(key)
    }
}

/// Pack `(entry name, bytes)` pairs into a deflated ZIP, in order.
fn build_zip(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn build_zip_keeps_entry_order_and_content() {
        let bytes = build_zip(vec![
            ("a.pdf".into(), b"alpha".to_vec()),
            ("a (2).pdf".into(), b"beta".to_vec()),
        ])
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "a.pdf");

        let mut second = String::new();
        archive
            .by_name("a (2).pdf")
            .unwrap()
            .read_to_string(&mut second)
            .unwrap();
        assert_eq!(second, "beta");
    }
}
