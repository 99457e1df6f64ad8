//! [`Converter`] backed by a headless LibreOffice process.
//!
//! Each conversion copies the input into a private scratch directory, runs
//! `libreoffice --headless --convert-to <ext> --outdir <dir> <input>` and
//! uploads the produced file. The worker owns the wall-clock timeout: when
//! it drops the conversion future the child is killed (`kill_on_drop`) and
//! the scratch directory is removed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use docshift_core::naming::{output_filename, split_extension};
use docshift_core::ports::{BlobError, BlobStore, ConversionRequest, Converter};
use docshift_core::retry::ConversionError;
use docshift_core::types::BlobKey;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Input extensions the engine is asked to handle.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odt", "rtf", "txt", "ppt", "pptx", "odp", "xls", "xlsx", "ods",
];

/// Maximum stderr captured from one run (64 KiB).
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Longest stderr excerpt kept in an error message.
const MAX_ERROR_EXCERPT: usize = 500;

pub struct LibreOfficeConverter {
    binary: String,
    output_extension: String,
    blobs: Arc<dyn BlobStore>,
    scratch_root: PathBuf,
}

impl LibreOfficeConverter {
    pub fn new(
        binary: impl Into<String>,
        output_extension: impl Into<String>,
        blobs: Arc<dyn BlobStore>,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            output_extension: output_extension.into(),
            blobs,
            scratch_root: scratch_root.into(),
        }
    }

    /// Run the engine on `input`, writing into `outdir`.
    async fn run_engine(&self, input: &Path, outdir: &Path, profile: &Path) -> Result<(), ConversionError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            // Concurrent instances sharing one profile block each other.
            .arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .arg("--convert-to")
            .arg(&self.output_extension)
            .arg("--outdir")
            .arg(outdir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConversionError::engine_unavailable(format!(
                "conversion engine '{}' not found",
                self.binary
            )),
            std::io::ErrorKind::PermissionDenied => ConversionError::engine_unavailable(format!(
                "conversion engine '{}' is not executable",
                self.binary
            )),
            _ => ConversionError::engine_unavailable(format!("failed to start conversion engine: {e}")),
        })?;

        let stderr_task = tokio::spawn(read_capped(child.stderr.take()));
        let status = child
            .wait()
            .await
            .map_err(|e| ConversionError::engine_unavailable(format!("conversion engine lost: {e}")))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(ConversionError::malformed(format!(
                "conversion failed with {status}: {}",
                excerpt(stderr.trim())
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    async fn convert(&self, request: &ConversionRequest) -> Result<BlobKey, ConversionError> {
        let supported = split_extension(&request.filename)
            .1
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));
        if !supported {
            return Err(ConversionError::unsupported(format!(
                "'{}' is not a supported document type",
                request.filename
            )));
        }

        let input_bytes = self.blobs.get(&request.input).await.map_err(|e| match e {
            BlobError::NotFound(key) => ConversionError::malformed(format!("input {key} is missing")),
            other => ConversionError::engine_unavailable(format!("could not read input: {other}")),
        })?;

        // Removed on drop, including when the timeout cancels this future.
        let (_scratch, base) = scratch_dir(&self.scratch_root)
            .map_err(|e| ConversionError::engine_unavailable(format!("could not prepare scratch dir: {e}")))?;
        let input_path = base.join("in").join(&request.filename);
        let outdir = base.join("out");
        let profile = base.join("profile");
        for dir in [base.join("in"), outdir.clone(), profile.clone()] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                ConversionError::engine_unavailable(format!("could not prepare scratch dir: {e}"))
            })?;
        }
        tokio::fs::write(&input_path, &input_bytes)
            .await
            .map_err(|e| ConversionError::engine_unavailable(format!("could not stage input: {e}")))?;

        self.run_engine(&input_path, &outdir, &profile).await?;

        let produced = outdir.join(output_filename(&request.filename, &self.output_extension));
        let output_bytes = match tokio::fs::read(&produced).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::malformed(format!(
                    "engine produced no output for '{}'",
                    request.filename
                )));
            }
            Err(e) => return Err(ConversionError::unclassified(format!("could not read output: {e}"))),
        };

        self.blobs
            .put(&request.output, output_bytes)
            .await
            .map_err(|e| ConversionError::engine_unavailable(format!("could not store output: {e}")))?;

        Ok(request.output.clone())
    }
}

/// Fresh scratch directory under `root` and its canonical path; the
/// engine's profile URL needs an absolute one.
fn scratch_dir(root: &Path) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    std::fs::create_dir_all(root)?;
    let dir = tempfile::Builder::new().prefix("convert-").tempdir_in(root)?;
    let path = std::fs::canonicalize(dir.path())?;
    Ok((dir, path))
}

async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

fn excerpt(text: &str) -> String {
    if text.is_empty() {
        return "no diagnostic output".into();
    }
    let mut end = text.len().min(MAX_ERROR_EXCERPT);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
