//! Response strategy: inline bytes or a redirect to a stored copy.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use mime::Mime;

use crate::processor::ProcessingResult;

/// Largest derivative returned in the response body, measured after base64
/// expansion for image content.
pub const INLINE_LIMIT: usize = 5 * 1024 * 1024;

/// Image bodies travel base64-encoded through the hosting gateway.
pub fn is_image(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .map(|m| m.type_() == mime::IMAGE)
        .unwrap_or(false)
}

/// Size of the body as it will be transmitted.
pub fn transmitted_len(result: &ProcessingResult) -> usize {
    if is_image(&result.content_type) {
        base64::encoded_len(result.body.len(), true).unwrap_or(usize::MAX)
    } else {
        result.body.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Respond with the body and cache it in the background.
    Inline,
    /// Store first, then redirect to the stored copy.
    Offload,
}

pub fn select(result: &ProcessingResult) -> Strategy {
    if transmitted_len(result) > INLINE_LIMIT {
        Strategy::Offload
    } else {
        Strategy::Inline
    }
}

/// Client-visible outcome of one request.
#[derive(Debug, Clone)]
pub enum Delivery {
    NoContent,
    Redirect(String),
    Inline {
        content_type: String,
        body: Bytes,
        binary: bool,
    },
    NotFound,
    BadRequest(String),
}

impl Delivery {
    pub fn inline(result: ProcessingResult) -> Self {
        let binary = is_image(&result.content_type);
        Delivery::Inline {
            content_type: result.content_type,
            body: result.body,
            binary,
        }
    }
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        match self {
            Delivery::NoContent => StatusCode::NO_CONTENT.into_response(),
            Delivery::Redirect(location) => match HeaderValue::from_str(&location) {
                Ok(value) => (StatusCode::SEE_OTHER, [(header::LOCATION, value)]).into_response(),
                Err(_) => {
                    tracing::error!(%location, "retrieval handle is not a valid header value");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            Delivery::Inline { content_type, body, binary } => {
                tracing::debug!(%content_type, binary, size = body.len(), "inline response");
                let content_type = HeaderValue::from_str(&content_type)
                    .unwrap_or(HeaderValue::from_static("application/octet-stream"));
                (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], Body::from(body)).into_response()
            }
            Delivery::NotFound => plain_text(StatusCode::NOT_FOUND, "Not Found".into()),
            Delivery::BadRequest(message) => plain_text(StatusCode::BAD_REQUEST, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content_type: &str, len: usize) -> ProcessingResult {
        ProcessingResult {
            content_type: content_type.into(),
            body: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn image_size_counts_base64_expansion() {
        // 3 raw bytes -> 4 encoded
        let at_limit = INLINE_LIMIT / 4 * 3;
        assert_eq!(transmitted_len(&result("image/jpeg", at_limit)), INLINE_LIMIT);
        assert_eq!(select(&result("image/jpeg", at_limit)), Strategy::Inline);
        assert_eq!(select(&result("image/jpeg", at_limit + 1)), Strategy::Offload);
    }

    #[test]
    fn text_size_is_raw() {
        assert_eq!(select(&result("application/json", INLINE_LIMIT)), Strategy::Inline);
        assert_eq!(select(&result("application/json", INLINE_LIMIT + 1)), Strategy::Offload);
    }

    #[test]
    fn binary_flag_follows_content_type() {
        assert!(matches!(Delivery::inline(result("image/png", 1)), Delivery::Inline { binary: true, .. }));
        assert!(matches!(Delivery::inline(result("application/json", 1)), Delivery::Inline { binary: false, .. }));
        assert!(!is_image("not a mime type"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Delivery::NoContent.into_response().status(), StatusCode::NO_CONTENT);
        let redirect = Delivery::Redirect("https://bucket/key?sig=1".into()).into_response();
        assert_eq!(redirect.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect.headers()[header::LOCATION], "https://bucket/key?sig=1");
        assert_eq!(Delivery::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(Delivery::BadRequest("bad".into()).into_response().status(), StatusCode::BAD_REQUEST);
    }
}
