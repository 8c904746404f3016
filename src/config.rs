//! Configuration loading and types for Shelfgate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! gateway: networking, authentication, the backing object store, the
//! multipart session side-table, and URL/listing/batch policy.  The whole
//! value is immutable after startup and is passed into each component at
//! construction time.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication / token verification settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Backing object store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Multipart session side-table settings.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Presigned URL policy.
    #[serde(default)]
    pub urls: UrlPolicyConfig,

    /// Listing pagination policy.
    #[serde(default)]
    pub listing: ListingConfig,

    /// Batch mutation limits.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Upload key derivation.
    #[serde(default)]
    pub uploads: UploadsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            sessions: SessionsConfig::default(),
            urls: UrlPolicyConfig::default(),
            listing: ListingConfig::default(),
            batch: BatchConfig::default(),
            uploads: UploadsConfig::default(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Authentication settings.
///
/// The gateway never issues credentials itself; it only checks bearer
/// tokens against one of three verifier kinds:
/// - `static`: constant-time comparison against `auth.token`
/// - `jwt`: HS256 verification against `auth.jwt_secret`
/// - `remote`: POST the token to `auth.endpoint` and accept on 2xx
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Verifier kind: `static`, `jwt` or `remote`.
    #[serde(default = "default_auth_mode")]
    pub mode: String,

    /// Shared bearer token for the `static` verifier.
    #[serde(default)]
    pub token: String,

    /// HMAC secret for the `jwt` verifier.
    #[serde(default)]
    pub jwt_secret: String,

    /// Verification endpoint for the `remote` verifier.
    #[serde(default)]
    pub endpoint: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            token: String::new(),
            jwt_secret: String::new(),
            endpoint: String::new(),
        }
    }
}

/// Backing object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Driver kind: `s3` or `memory`.
    #[serde(default = "default_storage_driver")]
    pub driver: String,

    /// S3 driver configuration.
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: default_storage_driver(),
            s3: None,
        }
    }
}

/// S3 driver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix applied to every object in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

/// Multipart session side-table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Store kind: `sqlite` or `memory`.
    #[serde(default = "default_session_engine")]
    pub engine: String,

    /// Path to the SQLite database file.
    #[serde(default = "default_session_path")]
    pub path: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            engine: default_session_engine(),
            path: default_session_path(),
        }
    }
}

/// Presigned URL policy.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlPolicyConfig {
    /// Expiry applied when the caller omits `expiresIn`, in seconds.
    #[serde(default = "default_url_expiry")]
    pub default_expiry_seconds: u64,

    /// Hard ceiling on requested expiry, in seconds.
    #[serde(default = "default_max_url_expiry")]
    pub max_expiry_seconds: u64,
}

impl Default for UrlPolicyConfig {
    fn default() -> Self {
        Self {
            default_expiry_seconds: default_url_expiry(),
            max_expiry_seconds: default_max_url_expiry(),
        }
    }
}

/// Listing pagination policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Page size applied when the caller omits `maxKeys`.
    #[serde(default = "default_max_keys")]
    pub default_max_keys: u32,

    /// Hard ceiling on requested page size.
    #[serde(default = "default_max_keys")]
    pub max_max_keys: u32,

    /// Secret used to seal continuation tokens. Must be shared by every
    /// gateway instance behind the same load balancer.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_max_keys: default_max_keys(),
            max_max_keys: default_max_keys(),
            token_secret: default_token_secret(),
        }
    }
}

/// Batch mutation limits.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum keys accepted by a single batch delete.
    #[serde(default = "default_batch_max_keys")]
    pub max_delete_keys: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_delete_keys: default_batch_max_keys(),
        }
    }
}

/// Upload key derivation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Prefix under which server-derived upload keys are placed.
    #[serde(default = "default_upload_prefix")]
    pub key_prefix: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_upload_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9414
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_auth_mode() -> String {
    "static".to_string()
}

fn default_storage_driver() -> String {
    "s3".to_string()
}

fn default_session_engine() -> String {
    "sqlite".to_string()
}

fn default_session_path() -> String {
    "./data/sessions.db".to_string()
}

fn default_url_expiry() -> u64 {
    900
}

fn default_max_url_expiry() -> u64 {
    // S3 caps presigned URLs at 7 days.
    604_800
}

fn default_max_keys() -> u32 {
    1000
}

fn default_token_secret() -> String {
    "shelfgate-continuation".to_string()
}

fn default_batch_max_keys() -> usize {
    1000
}

fn default_upload_prefix() -> String {
    "uploads/".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 9414);
        assert_eq!(config.urls.default_expiry_seconds, 900);
        assert_eq!(config.urls.max_expiry_seconds, 604_800);
        assert_eq!(config.listing.default_max_keys, 1000);
        assert_eq!(config.batch.max_delete_keys, 1000);
        assert_eq!(config.auth.mode, "static");
        assert_eq!(config.sessions.engine, "sqlite");
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
server:
  port: 8080
storage:
  driver: s3
  s3:
    bucket: shelf-media
    region: eu-west-1
    prefix: "books/"
urls:
  default_expiry_seconds: 300
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        let s3 = config.storage.s3.unwrap();
        assert_eq!(s3.bucket, "shelf-media");
        assert_eq!(s3.region, "eu-west-1");
        assert_eq!(s3.prefix, "books/");
        assert_eq!(config.urls.default_expiry_seconds, 300);
        // Untouched sections keep their defaults.
        assert_eq!(config.urls.max_expiry_seconds, 604_800);
    }
}
