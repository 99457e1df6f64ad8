//! Deterministic blob naming.
//!
//! Outputs are namespaced by job and task so concurrent workers never
//! write to the same key; archives are named from the job id alone so a
//! repeated assembly overwrites rather than duplicates.

use std::collections::HashSet;

use crate::types::{BlobKey, JobId, TaskId};

/// Prefix for converted outputs.
pub const OUTPUTS_PREFIX: &str = "outputs";

/// Prefix for assembled archives.
pub const ARCHIVES_PREFIX: &str = "archives";

/// Split `filename` into stem and extension (`"a.b.docx"` -> `("a.b", Some("docx"))`).
///
/// A leading dot does not start an extension (`".env"` has none).
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < filename.len() => {
            (&filename[..idx], Some(&filename[idx + 1..]))
        }
        _ => (filename, None),
    }
}

/// Name of the converted file for `filename` (`report.docx` -> `report.pdf`).
pub fn output_filename(filename: &str, extension: &str) -> String {
    let (stem, _) = split_extension(filename);
    format!("{stem}.{extension}")
}

/// Blob key where a task's converted output is written.
pub fn output_key(job_id: JobId, task_id: TaskId, filename: &str, extension: &str) -> BlobKey {
    // Filenames were validated at submission: no separators, never `.`/`..`.
    BlobKey::parse(format!(
        "{OUTPUTS_PREFIX}/{job_id}/{task_id}/{}",
        output_filename(filename, extension)
    ))
    .unwrap_or_else(|_| {
        BlobKey::parse(format!("{OUTPUTS_PREFIX}/{job_id}/{task_id}/output.{extension}"))
            .unwrap_or_else(|_| unreachable!("uuid-based keys are always valid"))
    })
}

/// Download name of a job's archive.
pub fn archive_filename(job_id: JobId) -> String {
    format!("converted_files_{job_id}.zip")
}

/// Blob key of a job's archive.
pub fn archive_key(job_id: JobId) -> BlobKey {
    BlobKey::parse(format!("{ARCHIVES_PREFIX}/{}", archive_filename(job_id)))
        .unwrap_or_else(|_| unreachable!("uuid-based keys are always valid"))
}

/// Allocates archive entry names, suffixing duplicates as `stem (2).ext`.
#[derive(Debug, Default)]
pub struct EntryNames {
    taken: HashSet<String>,
}

impl EntryNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique entry name derived from `name`.
    pub fn allocate(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = split_extension(name);
        let mut n = 2;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
