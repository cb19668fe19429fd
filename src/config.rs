use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default lifetime of signed retrieval handles.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Default upper bound on a single source object read through the resolver.
pub const DEFAULT_MAX_SOURCE_SIZE: usize = 256 * 1024 * 1024;

/// Default upper bound on the pixel count of a rendered derivative.
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            other => Err(ConfigError::InvalidValue {
                name: "IIIF_STORAGE",
                value: other.to_string(),
            }),
        }
    }
}

/// Process-wide configuration, read once at startup and shared immutably.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Bucket used when an identifier does not decode to a bucket/key pair.
    pub default_bucket: String,
    /// Prefix request paths with `/<stage>` before keying and processing.
    pub include_stage: bool,
    pub stage: String,
    pub storage: StorageBackend,
    pub region: String,
    /// Custom S3 endpoint (minio, localstack).
    pub endpoint: Option<String>,
    /// Root directory of the local backend; one subdirectory per bucket.
    pub local_root: PathBuf,
    /// Externally reachable base URL, used for local signed handles.
    pub public_url: String,
    pub signing_secret: String,
    pub signed_url_ttl: Duration,
    pub scratch_root: PathBuf,
    pub max_source_size: usize, // bytes
    /// Requests whose output would exceed this many pixels are rejected.
    pub max_output_pixels: u64,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_bucket: String::new(),
            include_stage: false,
            stage: String::new(),
            storage: StorageBackend::S3,
            region: "us-east-1".into(),
            endpoint: None,
            local_root: PathBuf::from("./storage"),
            public_url: "http://localhost:8080".into(),
            signing_secret: "local-dev-secret".into(),
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            scratch_root: std::env::temp_dir().join("iiif-cache"),
            max_source_size: DEFAULT_MAX_SOURCE_SIZE,
            max_output_pixels: DEFAULT_MAX_OUTPUT_PIXELS,
            port: 8080,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Default bucket cannot be empty")]
    EmptyDefaultBucket,
    #[error("Stage must be set when stage prefixing is enabled")]
    MissingStage,
    #[error("Signing secret cannot be empty")]
    EmptySecret,
    #[error("Signed URL lifetime must be > 0")]
    InvalidTtl,
    #[error("Max source size must be > 0")]
    InvalidMaxSource,
    #[error("Max output pixels must be > 0")]
    InvalidMaxOutput,
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl ProxyConfig {
    /// Builds the configuration from environment variables, falling back to
    /// [`ProxyConfig::default`] for anything unset.
    ///
    /// Recognized variables: `IIIF_DEFAULT_BUCKET`, `IIIF_INCLUDE_STAGE`,
    /// `IIIF_STAGE`, `IIIF_STORAGE`, `AWS_REGION`, `AWS_ENDPOINT_URL`,
    /// `IIIF_LOCAL_ROOT`, `IIIF_PUBLIC_URL`, `IIIF_SIGNING_SECRET`,
    /// `IIIF_SIGNED_URL_TTL` (seconds), `IIIF_SCRATCH_DIR`,
    /// `IIIF_MAX_SOURCE_SIZE` (bytes), `IIIF_MAX_OUTPUT_PIXELS` and `PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Ok(Self {
            default_bucket: var("IIIF_DEFAULT_BUCKET").unwrap_or(defaults.default_bucket),
            include_stage: var("IIIF_INCLUDE_STAGE").map(|v| is_truthy(&v)).unwrap_or(false),
            stage: var("IIIF_STAGE").unwrap_or(defaults.stage),
            storage: match var("IIIF_STORAGE") {
                Some(v) => v.parse()?,
                None => defaults.storage,
            },
            region: var("AWS_REGION").unwrap_or(defaults.region),
            endpoint: var("AWS_ENDPOINT_URL"),
            local_root: var("IIIF_LOCAL_ROOT").map(PathBuf::from).unwrap_or(defaults.local_root),
            public_url: var("IIIF_PUBLIC_URL").unwrap_or(defaults.public_url),
            signing_secret: var("IIIF_SIGNING_SECRET").unwrap_or(defaults.signing_secret),
            signed_url_ttl: match var("IIIF_SIGNED_URL_TTL") {
                Some(v) => Duration::from_secs(parse_number("IIIF_SIGNED_URL_TTL", &v)?),
                None => defaults.signed_url_ttl,
            },
            scratch_root: var("IIIF_SCRATCH_DIR").map(PathBuf::from).unwrap_or(defaults.scratch_root),
            max_source_size: match var("IIIF_MAX_SOURCE_SIZE") {
                Some(v) => parse_number("IIIF_MAX_SOURCE_SIZE", &v)?,
                None => defaults.max_source_size,
            },
            max_output_pixels: match var("IIIF_MAX_OUTPUT_PIXELS") {
                Some(v) => parse_number("IIIF_MAX_OUTPUT_PIXELS", &v)?,
                None => defaults.max_output_pixels,
            },
            port: match var("PORT") {
                Some(v) => parse_number("PORT", &v)?,
                None => defaults.port,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_bucket.trim().is_empty() { return Err(ConfigError::EmptyDefaultBucket); }
        if self.include_stage && self.stage.trim().is_empty() { return Err(ConfigError::MissingStage); }
        if self.signing_secret.trim().is_empty() { return Err(ConfigError::EmptySecret); }
        if self.signed_url_ttl.is_zero() { return Err(ConfigError::InvalidTtl); }
        if self.max_source_size == 0 { return Err(ConfigError::InvalidMaxSource); }
        if self.max_output_pixels == 0 { return Err(ConfigError::InvalidMaxOutput); }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ProxyConfig {
        ProxyConfig {
            default_bucket: "tiffs".into(),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn default_requires_bucket() {
        assert!(matches!(ProxyConfig::default().validate(), Err(ConfigError::EmptyDefaultBucket)));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn stage_required_when_enabled() {
        let cfg = ProxyConfig { include_stage: true, ..valid() };
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingStage)));

        let cfg = ProxyConfig { include_stage: true, stage: "prod".into(), ..valid() };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_ttl_rejected() {
        let cfg = ProxyConfig { signed_url_ttl: Duration::ZERO, ..valid() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTtl)));
    }

    #[test]
    fn zero_limits_rejected() {
        let cfg = ProxyConfig { max_source_size: 0, ..valid() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMaxSource)));

        let cfg = ProxyConfig { max_output_pixels: 0, ..valid() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMaxOutput)));
    }

    #[test]
    fn storage_backend_parses() {
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("true"));
        assert!(is_truthy(" 1 "));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
    }
}
