use crate::types::BlobKey;

/// Path-addressed byte storage for inputs, outputs and archives.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any previous content.
    async fn put(&self, key: &BlobKey, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobError>;

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(BlobKey),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
