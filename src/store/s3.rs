use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use super::{object_path, validate_bucket, BlobError, BlobStore, ByteStream, ObjectInfo};

/// S3 backend. One `AmazonS3` client per bucket, built lazily from the
/// region/endpoint given at startup; credentials come from the usual `AWS_*`
/// environment.
pub struct S3BlobStore {
    region: String,
    endpoint: Option<String>,
    clients: RwLock<HashMap<String, Arc<AmazonS3>>>,
}

impl S3BlobStore {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn client(&self, bucket: &str) -> Result<Arc<AmazonS3>, BlobError> {
        validate_bucket(bucket)?;
        if let Some(client) = self.clients.read().unwrap_or_else(PoisonError::into_inner).get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_region(&self.region)
            .with_bucket_name(bucket);
        // For supporting localstack/minio
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        let client = Arc::new(builder.build().map_err(BlobError::Backend)?);
        tracing::debug!(bucket, region = %self.region, "created S3 client");

        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BlobError> {
        let meta = self
            .client(bucket)?
            .head(&object_path(key))
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(ObjectInfo {
            size: meta.size,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ByteStream, BlobError> {
        let result = self
            .client(bucket)?
            .get(&object_path(key))
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(result.into_stream().map(|chunk| chunk.map_err(BlobError::Backend)).boxed())
    }

    async fn put(&self, bucket: &str, key: &str, content_type: &str, body: Bytes) -> Result<(), BlobError> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.client(bucket)?
            .put_opts(&object_path(key), PutPayload::from(body), opts)
            .await
            .map_err(|e| BlobError::from_store(bucket, key, e))?;
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        let url = self
            .client(bucket)?
            .signed_url(http::Method::GET, &object_path(key), expires_in)
            .await
            .map_err(|e| BlobError::Signing(e.to_string()))?;
        Ok(url.to_string())
    }
}
