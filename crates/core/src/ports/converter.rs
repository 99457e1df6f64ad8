use crate::retry::ConversionError;
use crate::types::BlobKey;

/// One conversion call: read `input`, write the result to `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: BlobKey,
    pub output: BlobKey,
    /// Original filename, used for format detection.
    pub filename: String,
}

/// The document conversion engine.
///
/// Implementations must classify every failure; see
/// [`ConversionError::unclassified`] for the catch-all.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    /// Convert and return the key the output was written to.
    async fn convert(&self, request: &ConversionRequest) -> Result<BlobKey, ConversionError>;
}
