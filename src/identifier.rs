//! Opaque source identifiers embedded in IIIF request paths.
//!
//! An identifier segment is a percent-encoded base64 blob of the JSON document
//! `{"bucket": "...", "key": "..."}`. Segments that do not decode that way are
//! still accepted: they name an object in the default bucket.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path prefix that precedes the identifier segment.
pub const ROUTE_PREFIX: &str = "/iiif/2/";

/// Extension assumed for source keys that carry none.
pub const DEFAULT_SOURCE_EXTENSION: &str = "tif";

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

#[derive(Error, Debug)]
pub enum IdentifierError {
    #[error("invalid percent-encoding: {0}")]
    Percent(#[from] std::str::Utf8Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid identifier document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Location of a source asset in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub bucket: String,
    pub key: String,
}

impl Identifier {
    /// Decodes `token`, falling back to `{default_bucket, token}` when it is not
    /// an encoded bucket/key document. Never fails.
    pub fn decode(token: &str, default_bucket: &str) -> Self {
        match Self::try_decode(token) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(token, error = %e, "identifier did not decode, using default bucket");
                Self {
                    bucket: default_bucket.to_string(),
                    key: token.to_string(),
                }
            }
        }
    }

    pub fn try_decode(token: &str) -> Result<Self, IdentifierError> {
        let unescaped = percent_decode_str(token).decode_utf8()?;
        let raw = STANDARD_LENIENT
            .decode(unescaped.as_bytes())
            .or_else(|_| URL_SAFE_LENIENT.decode(unescaped.as_bytes()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Renders the identifier as a path-safe token accepted by [`Identifier::decode`].
    pub fn encode(&self) -> String {
        let document = serde_json::json!({ "bucket": self.bucket, "key": self.key });
        let blob = STANDARD.encode(document.to_string());
        utf8_percent_encode(&blob, NON_ALPHANUMERIC).to_string()
    }

    /// Key of the source object, with `.tif` appended when the key has no
    /// extension of its own.
    pub fn source_key(&self) -> String {
        if has_extension(&self.key) {
            self.key.clone()
        } else {
            format!("{}.{}", self.key, DEFAULT_SOURCE_EXTENSION)
        }
    }
}

fn has_extension(key: &str) -> bool {
    match key.rfind('.') {
        Some(dot) => key[dot + 1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

/// The raw identifier segment of a request path, if the path carries one.
pub fn identifier_segment(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(ROUTE_PREFIX)?;
    let segment = rest.split('/').next().unwrap_or_default();
    (!segment.is_empty()).then_some(segment)
}

/// Bucket addressed by a request path, using the same fallback as
/// [`Identifier::decode`] so it always agrees with later key resolution.
pub fn bucket_of(path: &str, default_bucket: &str) -> String {
    match identifier_segment(path) {
        Some(segment) => Identifier::decode(segment, default_bucket).bucket,
        None => default_bucket.to_string(),
    }
}
