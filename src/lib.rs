use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod delivery;
pub mod fetch;
pub mod identifier;
pub mod middleware;
pub mod orchestrator;
pub mod processor;
pub mod scratch;
pub mod signature;
pub mod store;
pub mod transform;

use crate::config::{ConfigError, ProxyConfig, StorageBackend};
use crate::delivery::Delivery;
use crate::orchestrator::Orchestrator;
use crate::processor::ImageProcessor;
use crate::signature::{SignatureError, UrlSigner};
use crate::store::{content_type_for_key, BlobError, BlobStore, LocalBlobStore, S3BlobStore};
use crate::transform::IiifProcessor;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] BlobError),
    #[error("Processor error: {0}")]
    Processor(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Unclassified failures surface as a bare 500; details go to the log only.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Shared handles for all routes. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn BlobStore>,
    url_signer: Option<UrlSigner>,
}

impl AppState {
    /// Wires the state from explicit parts. `url_signer` enables the
    /// `/cached` route for locally signed handles.
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn BlobStore>,
        processor: Arc<dyn ImageProcessor>,
        url_signer: Option<UrlSigner>,
    ) -> Self {
        let orchestrator = Orchestrator::new(Arc::new(config), store.clone(), processor);
        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            url_signer,
        }
    }

    /// Builds the configured storage backend and the bundled IIIF processor.
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let processor = Arc::new(IiifProcessor::new(config.max_source_size, config.max_output_pixels));

        let state = match config.storage {
            StorageBackend::S3 => {
                let store = Arc::new(S3BlobStore::new(config.region.clone(), config.endpoint.clone()));
                Self::new(config, store, processor, None)
            }
            StorageBackend::Local => {
                let signer = UrlSigner::new(config.public_url.clone(), config.signing_secret.clone());
                let store = Arc::new(LocalBlobStore::on_disk(config.local_root.clone(), signer.clone()));
                Self::new(config, store, processor, Some(signer))
            }
        };
        Ok(state)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

async fn iiif_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Delivery> {
    tracing::debug!("{} {}", method, uri.path());
    state.orchestrator.handle(&method, uri.path(), &headers).await
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

/// Serves objects of the local backend behind HMAC-signed, expiring URLs.
async fn cached_handler(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> Response {
    let Some(signer) = &state.url_signer else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    if let Err(e) = signer.verify(&bucket, &key, query.expires, &query.sig) {
        tracing::warn!(%bucket, %key, "rejected cached object request: {}", e);
        let status = match e {
            SignatureError::Expired => StatusCode::GONE,
            _ => StatusCode::UNAUTHORIZED,
        };
        return (status, e.to_string()).into_response();
    }

    match state.store.get(&bucket, &key).await {
        Ok(stream) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for_key(&key)));
            (headers, Body::from_stream(stream)).into_response()
        }
        Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        Err(e) => ProxyError::Storage(e).into_response(),
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "iiif-cache"
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/iiif/2/*path", any(iiif_handler))
        .route("/cached/:bucket/*key", get(cached_handler))
        .layer(from_fn(crate::middleware::cors_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
