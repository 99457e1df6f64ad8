//! [`BlobStore`] on the local filesystem.
//!
//! Keys map 1:1 onto paths under the root. Writes go to a temporary
//! sibling first and are renamed into place, so readers never observe a
//! half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docshift_core::ports::{BlobError, BlobStore};
use docshift_core::types::BlobKey;

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `key`.
    ///
    /// `BlobKey` rejects absolute paths and `..` segments, so the result
    /// always lies under the root.
    pub fn resolve(&self, key: &BlobKey) -> PathBuf {
        key.segments().fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &BlobKey, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.resolve(key);
        let write = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| BlobError::WriteFailed(format!("{key}: writer task failed: {e}")))?;
        write.map_err(|e| BlobError::WriteFailed(format!("{key}: {e}")))
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(self.resolve(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(key.clone())),
            Err(e) => Err(BlobError::ReadFailed(format!("{key}: {e}"))),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.resolve(key)).await?)
    }
}

/// Write `bytes` to a uniquely named temp file beside `path`, then
/// rename it over `path`. The temp file is deleted if any step fails.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".blob-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let key = BlobKey::parse("outputs/job/task/report.pdf").unwrap();

        store.put(&key, b"%PDF-1.7".to_vec()).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), b"%PDF-1.7");
        assert!(dir.path().join("outputs/job/task/report.pdf").is_file());
    }

    #[tokio::test]
    async fn put_replaces_existing_content_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let key = BlobKey::parse("archives/a.zip").unwrap();

        store.put(&key, b"first".to_vec()).await.unwrap();
        store.put(&key, b"second".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"second");

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("archives"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("a.zip")]);
    }

    #[tokio::test]
    async fn keys_resolve_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();
        assert!(store.root().is_dir());

        let key = BlobKey::parse("uploads/7/a.docx").unwrap();
        let path = store.resolve(&key);
        assert!(path.starts_with(store.root()));
        assert_eq!(path, store.root().join("uploads").join("7").join("a.docx"));
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_key_leave_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let key = BlobKey::parse("archives/b.zip").unwrap();

        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.put(&key, vec![i; 64]).await })
            })
            .collect();
        for w in writers {
            w.await.unwrap().unwrap();
        }

        let content = store.get(&key).await.unwrap();
        assert_eq!(content.len(), 64);
        assert!(content.iter().all(|b| *b == content[0]));
        assert_eq!(std::fs::read_dir(dir.path().join("archives")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let key = BlobKey::parse("nope.pdf").unwrap();
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(store.get(&key).await, Err(BlobError::NotFound(_))));
    }
}
