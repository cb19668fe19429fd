use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::time::Duration;

/// Characters left unescaped inside a single URL path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature")] Missing,
    #[error("invalid signature")] Invalid,
    #[error("expired")] Expired,
}

/// Issues and verifies time-limited retrieval URLs for the local backend.
#[derive(Clone)]
pub struct UrlSigner {
    public_url: String,
    secret: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").field("public_url", &self.public_url).finish_non_exhaustive()
    }
}

// Canonical string over sorted parameters
fn canonical_string(bucket: &str, key: &str, expires: i64) -> String {
    format!("bucket={}&expires={}&key={}", bucket, expires, key)
}

fn mac_for(canonical: &str, secret: &str) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Invalid)?;
    mac.update(canonical.as_bytes());
    Ok(mac)
}

impl UrlSigner {
    pub fn new(public_url: impl Into<String>, secret: impl Into<String>) -> Self {
        let public_url: String = public_url.into();
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    /// `<public_url>/cached/<bucket>/<key>?expires=<unix seconds>&sig=<hex>`
    pub fn sign(&self, bucket: &str, key: &str, expires_in: Duration) -> String {
        let expires = time::OffsetDateTime::now_utc().unix_timestamp()
            + i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX / 2);
        // HMAC accepts keys of any length, so this never takes the error path
        let sig = mac_for(&canonical_string(bucket, key, expires), &self.secret)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();

        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/cached/{}/{}?expires={}&sig={}",
            self.public_url,
            utf8_percent_encode(bucket, SEGMENT),
            path,
            expires,
            sig
        )
    }

    pub fn verify(&self, bucket: &str, key: &str, expires: i64, sig: &str) -> Result<(), SignatureError> {
        if sig.is_empty() { return Err(SignatureError::Missing); }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        if expires < now { return Err(SignatureError::Expired); }

        let expected = hex::decode(sig).map_err(|_| SignatureError::Invalid)?;
        mac_for(&canonical_string(bucket, key, expires), &self.secret)?
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_of(url: &str) -> (i64, String) {
        let (_, query) = url.split_once('?').unwrap();
        let mut expires = 0;
        let mut sig = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("sig", v) => sig = v.to_string(),
                _ => {}
            }
        }
        (expires, sig)
    }

    #[test]
    fn signature_validates() {
        let signer = UrlSigner::new("http://localhost:8080/", "s");
        let url = signer.sign("scans", "iiif-cache/ab/default.jpg", Duration::from_secs(60));
        assert!(url.starts_with("http://localhost:8080/cached/scans/iiif-cache/ab/default.jpg?"));
        let (expires, sig) = query_of(&url);
        assert!(signer.verify("scans", "iiif-cache/ab/default.jpg", expires, &sig).is_ok());
    }

    #[test]
    fn signature_rejects_tamper() {
        let signer = UrlSigner::new("http://localhost:8080", "s");
        let (expires, sig) = query_of(&signer.sign("scans", "a.jpg", Duration::from_secs(60)));
        assert!(matches!(signer.verify("scans", "b.jpg", expires, &sig), Err(SignatureError::Invalid)));
        assert!(matches!(signer.verify("other", "a.jpg", expires, &sig), Err(SignatureError::Invalid)));
        assert!(matches!(signer.verify("scans", "a.jpg", expires + 1, &sig), Err(SignatureError::Invalid)));
        assert!(matches!(signer.verify("scans", "a.jpg", expires, "zz"), Err(SignatureError::Invalid)));
        assert!(matches!(signer.verify("scans", "a.jpg", expires, ""), Err(SignatureError::Missing)));

        let other = UrlSigner::new("http://localhost:8080", "different");
        assert!(other.verify("scans", "a.jpg", expires, &sig).is_err());
    }

    #[test]
    fn signature_expires() {
        let signer = UrlSigner::new("http://localhost:8080", "s");
        assert!(matches!(signer.verify("scans", "a.jpg", 1_000_000_000, "00"), Err(SignatureError::Expired)));
    }

    #[test]
    fn key_segments_are_escaped() {
        let signer = UrlSigner::new("http://h", "s");
        let url = signer.sign("scans", "dir with space/a?.jpg", Duration::from_secs(60));
        assert!(url.starts_with("http://h/cached/scans/dir%20with%20space/a%3F.jpg?"));
    }
}
