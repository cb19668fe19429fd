//! Per-request flow: cache probe, processing on a miss, delivery and
//! background write-back.

use axum::http::{header, HeaderMap, Method};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheGateway, CacheKey};
use crate::config::ProxyConfig;
use crate::delivery::{self, Delivery, Strategy};
use crate::identifier::bucket_of;
use crate::processor::{ImageProcessor, ProcessingResult, ProcessorError, StoreResolver};
use crate::scratch::Scratch;
use crate::store::BlobStore;
use crate::ProxyError;

/// Suffixes that mark a path as a complete image or document request.
const RECOGNIZED_SUFFIXES: [&str; 6] = [".jpg", ".tif", ".gif", ".png", ".webp", ".json"];

/// Canonical form of a request path: `/info.json` is appended to bare
/// identifiers and the deployment stage is prefixed when configured.
pub fn normalize_path(raw: &str, config: &ProxyConfig) -> String {
    let mut path = raw.to_string();
    if !RECOGNIZED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
        path.truncate(path.trim_end_matches('/').len());
        path.push_str("/info.json");
    }
    if config.include_stage {
        path = format!("/{}{}", config.stage, path);
    }
    path
}

/// URI handed to the processor; it determines the `@id` of info.json.
pub fn processor_uri(headers: &HeaderMap, path: &str) -> String {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty());
    let scheme = header_str("x-forwarded-proto").unwrap_or("http");
    let host = header_str(header::HOST.as_str()).unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, path)
}

pub struct Orchestrator {
    config: Arc<ProxyConfig>,
    store: Arc<dyn BlobStore>,
    cache: CacheGateway,
    processor: Arc<dyn ImageProcessor>,
    write_backs: TaskTracker,
}

impl Orchestrator {
    pub fn new(config: Arc<ProxyConfig>, store: Arc<dyn BlobStore>, processor: Arc<dyn ImageProcessor>) -> Self {
        let cache = CacheGateway::new(store.clone(), config.signed_url_ttl);
        Self {
            config,
            store,
            cache,
            processor,
            write_backs: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Waits for every background cache write started so far.
    pub async fn wait_for_write_backs(&self) {
        self.write_backs.close();
        self.write_backs.wait().await;
        self.write_backs.reopen();
    }

    /// Handles one request.
    ///
    /// Client errors come back as `Ok` deliveries; `Err` is reserved for
    /// unclassified failures that should surface as a server error.
    pub async fn handle(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<Delivery, ProxyError> {
        if method == Method::OPTIONS {
            return Ok(Delivery::NoContent);
        }

        let bucket = bucket_of(path, &self.config.default_bucket);
        let normalized = normalize_path(path, &self.config);
        let key = CacheKey::derive(&normalized);

        if let Some(url) = self.cache.check(&bucket, &key).await {
            tracing::info!(bucket = %bucket, %key, "cache hit");
            return Ok(Delivery::Redirect(url));
        }
        tracing::info!(bucket = %bucket, %key, "cache miss, processing {}", normalized);

        let uri = processor_uri(headers, &normalized);
        let resolver = StoreResolver::new(self.store.clone(), bucket.clone(), self.config.default_bucket.clone());
        let scratch = match Scratch::create(&self.config.scratch_root).await {
            Ok(scratch) => Some(scratch),
            Err(e) => {
                tracing::warn!(root = %self.config.scratch_root.display(), error = %e, "could not create scratch directory");
                None
            }
        };
        let fallback = std::env::temp_dir();
        let scratch_dir = scratch.as_ref().map_or(fallback.as_path(), Scratch::path);
        let outcome = self.processor.execute(&uri, &resolver, scratch_dir).await;
        if let Some(scratch) = scratch {
            scratch.release();
        }

        match outcome {
            Ok(result) => self.deliver(bucket, key, result).await,
            Err(ProcessorError::NotFound) => {
                tracing::info!(%uri, "source not found");
                Ok(Delivery::NotFound)
            }
            Err(ProcessorError::Validation(message)) => {
                tracing::info!(%uri, reason = %message, "rejected IIIF request");
                Ok(Delivery::BadRequest(message))
            }
            Err(ProcessorError::Internal(message)) => Err(ProxyError::Processor(message)),
        }
    }

    async fn deliver(&self, bucket: String, key: CacheKey, result: ProcessingResult) -> Result<Delivery, ProxyError> {
        match delivery::select(&result) {
            Strategy::Offload => {
                tracing::info!(%key, size = result.body.len(), "derivative too large to inline, redirecting");
                let url = self.cache.store(&bucket, &key, &result).await?;
                Ok(Delivery::Redirect(url))
            }
            Strategy::Inline => {
                if !key.is_info_json() {
                    self.spawn_write_back(bucket, key, result.clone());
                }
                Ok(Delivery::inline(result))
            }
        }
    }

    fn spawn_write_back(&self, bucket: String, key: CacheKey, result: ProcessingResult) {
        let cache = self.cache.clone();
        self.write_backs.spawn(async move {
            if let Err(e) = cache.store(&bucket, &key, &result).await {
                tracing::warn!(bucket = %bucket, %key, error = %e, "background cache write failed");
            }
        });
    }
}
