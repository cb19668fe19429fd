use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use iiif_cache::config::ProxyConfig;
use iiif_cache::processor::{ImageProcessor, ProcessingResult, ProcessorError, Resolver};
use iiif_cache::signature::UrlSigner;
use iiif_cache::store::{BlobStore, LocalBlobStore};
use iiif_cache::{router, AppState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

struct Unused;

#[async_trait::async_trait]
impl ImageProcessor for Unused {
    async fn execute(&self, _: &str, _: &dyn Resolver, _: &Path) -> Result<ProcessingResult, ProcessorError> {
        Err(ProcessorError::Internal("not expected".into()))
    }
}

async fn state_with_object(signed: bool) -> (AppState, Arc<LocalBlobStore>) {
    let store = Arc::new(LocalBlobStore::in_memory(UrlSigner::new("http://localhost:8080", "test-secret")));
    store
        .put("scans", "iiif-cache/ab/cd/default.jpg", "image/jpeg", Bytes::from_static(b"jpeg-bytes"))
        .await
        .unwrap();
    let signer = signed.then(|| store.signer().clone());
    let config = ProxyConfig {
        default_bucket: "tiffs".into(),
        ..ProxyConfig::default()
    };
    (AppState::new(config, store.clone(), Arc::new(Unused), signer), store)
}

async fn get(state: &AppState, uri: &str) -> axum::response::Response {
    router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn signed_url_serves_object() {
    let (state, store) = state_with_object(true).await;
    let url = store
        .signed_url("scans", "iiif-cache/ab/cd/default.jpg", Duration::from_secs(60))
        .await
        .unwrap();

    let response = get(&state, url.trim_start_matches("http://localhost:8080")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"jpeg-bytes");
}

#[tokio::test]
async fn tampered_url_is_rejected() {
    let (state, store) = state_with_object(true).await;
    let url = store
        .signed_url("scans", "iiif-cache/ab/cd/default.jpg", Duration::from_secs(60))
        .await
        .unwrap();
    let tampered = url
        .trim_start_matches("http://localhost:8080")
        .replace("default.jpg", "other.jpg");

    let response = get(&state, &tampered).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_url_is_gone() {
    let (state, _) = state_with_object(true).await;
    let response = get(&state, "/cached/scans/iiif-cache/ab/cd/default.jpg?expires=1000000000&sig=00").await;
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn missing_object_is_404() {
    let (state, store) = state_with_object(true).await;
    let url = store
        .signed_url("scans", "iiif-cache/ff/missing.jpg", Duration::from_secs(60))
        .await
        .unwrap();

    let response = get(&state, url.trim_start_matches("http://localhost:8080")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cached_route_disabled_without_signer() {
    let (state, store) = state_with_object(false).await;
    let url = store
        .signed_url("scans", "iiif-cache/ab/cd/default.jpg", Duration::from_secs(60))
        .await
        .unwrap();

    let response = get(&state, url.trim_start_matches("http://localhost:8080")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
