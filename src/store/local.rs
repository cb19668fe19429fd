use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, PutPayload};

use super::{object_path, validate_bucket, BlobError, BlobStore, ByteStream, ObjectInfo};
use crate::signature::UrlSigner;

/// Filesystem (or in-memory) backend for development and tests.
///
/// Each bucket is a directory under `root`. Retrieval handles are HMAC-signed
/// URLs served by this process under `/cached`. Content types are not stored;
/// the serving route infers them from the key's extension.
pub struct LocalBlobStore {
    root: Option<PathBuf>,
    signer: UrlSigner,
    buckets: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl LocalBlobStore {
    pub fn on_disk(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: Some(root.into()),
            signer,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Volatile store; everything is lost on drop.
    pub fn in_memory(signer: UrlSigner) -> Self {
        Self {
            root: None,
            signer,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BlobError> {
        validate_bucket(bucket)?;
        if let Some(store) = self.buckets.read().unwrap_or_else(PoisonError::into_inner).get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.root {
            Some(root) => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(BlobError::Backend)?)
            }
            None => Arc::new(InMemory::new()),
        };

        // Another request may have raced us here; keep whichever landed first.
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Ok(buckets.entry(bucket.to_string()).or_insert(store).clone())
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BlobError> {
        let meta = self
            .bucket(bucket)?
            .head(&object_path(key))
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(ObjectInfo {
            size: meta.size,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, BlobError> {
        let result = self
            .bucket(bucket)?
            .get(&object_path(key))
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(result.into_stream().map(|chunk| chunk.map_err(BlobError::Backend)).boxed())
    }

    async fn put(&self, bucket: &str, key: &str, _content_type: &str, body: Bytes) -> Result<(), BlobError> {
        self.bucket(bucket)?
            .put(&object_path(key), PutPayload::from(body))
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        validate_bucket(bucket)?;
        Ok(self.signer.sign(bucket, key, expires_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("http://localhost:8080", "secret")
    }

    async fn read(store: &LocalBlobStore, bucket: &str, key: &str) -> Vec<u8> {
        let mut stream = store.get(bucket, key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn put_head_get_in_memory() {
        let store = LocalBlobStore::in_memory(signer());
        assert!(store.head("scans", "a.tif").await.unwrap_err().is_not_found());

        store.put("scans", "a.tif", "image/tiff", Bytes::from_static(b"tiff")).await.unwrap();
        assert_eq!(store.head("scans", "a.tif").await.unwrap().size, 4);
        assert_eq!(read(&store, "scans", "a.tif").await, b"tiff");

        // buckets are isolated
        assert!(store.head("other", "a.tif").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn on_disk_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::on_disk(dir.path(), signer());
        store
            .put("scans", "iiif-cache/ab/cd/default.jpg", "image/jpeg", Bytes::from_static(b"jpg"))
            .await
            .unwrap();
        assert!(dir.path().join("scans/iiif-cache/ab/cd/default.jpg").is_file());
        assert_eq!(read(&store, "scans", "iiif-cache/ab/cd/default.jpg").await, b"jpg");
    }

    #[tokio::test]
    async fn rejects_traversal_bucket() {
        let store = LocalBlobStore::in_memory(signer());
        let err = store.head("..", "x").await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidBucket(_)));
    }

    #[tokio::test]
    async fn signed_url_points_at_cached_route() {
        let store = LocalBlobStore::in_memory(signer());
        let url = store.signed_url("scans", "iiif-cache/ab/default.jpg", Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("http://localhost:8080/cached/scans/iiif-cache/ab/default.jpg?expires="));
        assert!(url.contains("&sig="));
    }
}
