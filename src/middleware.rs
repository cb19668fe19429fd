use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request, Response},
    middleware::Next,
};

/// Cross-origin headers attached to every response.
///
/// Preflight `OPTIONS` requests are answered by the IIIF route itself (204);
/// this layer only decorates responses, it never short-circuits them.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
    /// Value of `Access-Control-Allow-Origin`.
    pub allow_origin: &'static str,

    /// Methods advertised on preflight responses.
    pub allow_methods: &'static str,

    /// Request headers advertised on preflight responses.
    pub allow_headers: &'static str,

    /// How long browsers may cache a preflight result, in seconds.
    pub max_age: u32,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origin: "*",
            allow_methods: "GET, HEAD, OPTIONS",
            allow_headers: "Authorization, Content-Type, Range",
            max_age: 86400,
        }
    }
}

impl CorsPolicy {
    pub fn apply(&self, headers: &mut HeaderMap, preflight: bool) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(self.allow_origin));
        if preflight {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(self.allow_methods));
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(self.allow_headers));
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
        }
    }
}

/// Axum middleware applying the default [`CorsPolicy`].
pub async fn cors_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    CorsPolicy::default().apply(response.headers_mut(), preflight);
    response
}
