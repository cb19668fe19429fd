use sha2::{Digest, Sha256};
use std::fmt;

/// Top-level prefix under which derivatives are stored in the source bucket.
pub const CACHE_PREFIX: &str = "iiif-cache";

/// Storage key of a cached derivative.
///
/// `iiif-cache/<sha256 hex in 2-char groups>/<last path segment>`. The digest
/// is sharded to bound per-directory fan-out; the trailing filename is kept so
/// the extension survives into the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(normalized_path: &str) -> Self {
        let digest = hex::encode(Sha256::digest(normalized_path.as_bytes()));
        let shards = (0..digest.len())
            .step_by(2)
            .map(|i| &digest[i..i + 2])
            .collect::<Vec<_>>()
            .join("/");
        let file_name = match normalized_path.rfind('/') {
            Some(slash) => &normalized_path[slash + 1..],
            None => normalized_path,
        };
        Self(format!("{}/{}/{}", CACHE_PREFIX, shards, file_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `info.json` documents are always generated live and never cached.
    pub fn is_info_json(&self) -> bool {
        self.0.ends_with("info.json")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
