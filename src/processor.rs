//! Contract with the image processing engine.
//!
//! The engine is handed the full request URI and a [`Resolver`] it can use to
//! read source bytes; it answers with a [`ProcessingResult`] or a classified
//! [`ProcessorError`].

use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::identifier::Identifier;
use crate::store::{BlobError, BlobStore, ByteStream};

/// A computed derivative.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Source or derivative cannot be located.
    #[error("Not Found")]
    NotFound,
    /// Malformed request parameters; the message is shown to the client.
    #[error("{0}")]
    Validation(String),
    #[error("internal processor error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(BlobError),
}

impl From<ResolveError> for ProcessorError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => ProcessorError::NotFound,
            ResolveError::Storage(e) => ProcessorError::Internal(e.to_string()),
        }
    }
}

/// Turns an identifier from the request into a readable source stream.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn open(&self, identifier: &str) -> Result<ByteStream, ResolveError>;
}

#[async_trait::async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Produces the derivative addressed by `uri`.
    ///
    /// `scratch` is an empty directory private to this invocation; it is
    /// removed once the request resolves.
    async fn execute(
        &self,
        uri: &str,
        resolver: &dyn Resolver,
        scratch: &Path,
    ) -> Result<ProcessingResult, ProcessorError>;
}

/// Resolves identifiers against the request's source bucket.
pub struct StoreResolver {
    store: Arc<dyn BlobStore>,
    bucket: String,
    default_bucket: String,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>, default_bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            default_bucket: default_bucket.into(),
        }
    }
}

#[async_trait::async_trait]
impl Resolver for StoreResolver {
    async fn open(&self, identifier: &str) -> Result<ByteStream, ResolveError> {
        let key = Identifier::decode(identifier, &self.default_bucket).source_key();
        tracing::debug!(bucket = %self.bucket, key = %key, "opening source object");
        self.store.get(&self.bucket, &key).await.map_err(|e| match e {
            BlobError::NotFound { .. } => ResolveError::NotFound(key),
            other => ResolveError::Storage(other),
        })
    }
}
