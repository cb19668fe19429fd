//! Derivative cache kept in the source bucket of the blob store.

pub mod key;

pub use key::{CacheKey, CACHE_PREFIX};

use std::sync::Arc;
use std::time::Duration;

use crate::processor::ProcessingResult;
use crate::store::{BlobError, BlobStore};

/// Hit/miss probe and write-back for cached derivatives.
///
/// Probing never fails: anything short of a confirmed, signable object is a
/// miss.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Signed handle to the cached derivative, or `None` on a miss.
    ///
    /// `info.json` keys are a miss without touching storage.
    pub async fn check(&self, bucket: &str, key: &CacheKey) -> Option<String> {
        if key.is_info_json() {
            tracing::debug!(%key, "info.json is never served from cache");
            return None;
        }

        match self.store.head(bucket, key.as_str()).await {
            Ok(info) => match self.store.signed_url(bucket, key.as_str(), self.ttl).await {
                Ok(url) => {
                    tracing::debug!(bucket, %key, size = info.size, "cached derivative found");
                    Some(url)
                }
                Err(e) => {
                    tracing::warn!(bucket, %key, error = %e, "cached object exists but could not be signed");
                    None
                }
            },
            Err(BlobError::NotFound { .. }) => None,
            Err(e) => {
                tracing::warn!(bucket, %key, error = %e, "cache probe failed, treating as miss");
                None
            }
        }
    }

    /// Uploads a derivative and returns a signed handle to it.
    pub async fn store(&self, bucket: &str, key: &CacheKey, result: &ProcessingResult) -> Result<String, BlobError> {
        self.store
            .put(bucket, key.as_str(), &result.content_type, result.body.clone())
            .await?;
        tracing::debug!(bucket, %key, size = result.body.len(), "cached derivative");
        self.store.signed_url(bucket, key.as_str(), self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::UrlSigner;
    use crate::store::LocalBlobStore;
    use bytes::Bytes;

    fn gateway() -> CacheGateway {
        let store = LocalBlobStore::in_memory(UrlSigner::new("http://h", "s"));
        CacheGateway::new(Arc::new(store), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = gateway();
        let key = CacheKey::derive("/iiif/2/abc/full/full/0/default.jpg");
        assert!(cache.check("scans", &key).await.is_none());

        let result = ProcessingResult {
            content_type: "image/jpeg".into(),
            body: Bytes::from_static(b"jpeg"),
        };
        let stored = cache.store("scans", &key, &result).await.unwrap();
        assert!(stored.contains(key.as_str()));

        let hit = cache.check("scans", &key).await.unwrap();
        assert!(hit.starts_with("http://h/cached/scans/iiif-cache/"));
    }

    #[tokio::test]
    async fn info_json_always_misses() {
        let cache = gateway();
        let key = CacheKey::derive("/iiif/2/abc/info.json");
        let result = ProcessingResult {
            content_type: "application/json".into(),
            body: Bytes::from_static(b"{}"),
        };
        cache.store("scans", &key, &result).await.unwrap();
        assert!(cache.check("scans", &key).await.is_none());
    }

    #[tokio::test]
    async fn probe_errors_are_misses() {
        let cache = gateway();
        let key = CacheKey::derive("/iiif/2/abc/full/full/0/default.jpg");
        // invalid bucket names fail the probe itself
        assert!(cache.check("Not A Bucket", &key).await.is_none());
    }
}
