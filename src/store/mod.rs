//! Blob store seam used for source reads and derivative caching.

pub mod local;
pub mod s3;

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Chunked body of a stored object.
pub type ByteStream = BoxStream<'static, Result<Bytes, BlobError>>;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid bucket name: {0:?}")]
    InvalidBucket(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] object_store::Error),
    #[error("failed to sign retrieval URL: {0}")]
    Signing(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub(crate) fn from_store(bucket: &str, key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => BlobError::Backend(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// Metadata returned by an existence probe.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub size: u64,
}

/// Bucket-addressed object storage with signed retrieval.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Metadata-only existence probe. Missing objects are `BlobError::NotFound`.
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BlobError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, BlobError>;

    async fn put(&self, bucket: &str, key: &str, content_type: &str, body: Bytes) -> Result<(), BlobError>;

    /// Time-limited URL granting unauthenticated GET access to one object.
    async fn signed_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, BlobError>;
}

/// Bucket names double as directory names in the local backend, so only the
/// S3 naming alphabet is accepted.
pub(crate) fn validate_bucket(bucket: &str) -> Result<(), BlobError> {
    let valid = !bucket.is_empty()
        && bucket.len() <= 255
        && bucket != "."
        && bucket != ".."
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidBucket(bucket.to_string()))
    }
}

pub(crate) fn object_path(key: &str) -> Path {
    Path::from(key)
}

/// Content type implied by a key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
