//! Configuration loading and types for the gateway.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the HTTP listener, tenant authorization, the credential store,
//! object storage, logging, and the metrics listener.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Tenant authorization settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Source-of-truth credential store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics listener).
    #[serde(default)]
    pub observability: ObservabilityConfig,
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

    /// Drain timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum size of a single uploaded file in bytes (0 = unlimited).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory for staged uploads. Empty means the system temp dir.
    #[serde(default)]
    pub staging_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_file_size: default_max_file_size(),
            staging_dir: String::new(),
        }
    }
}

/// Tenant authorization settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Sliding expiry of cached credentials, in days.
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u64,

    /// Upper bound on concurrently running cache refresh tasks.
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,

    /// Where clients with an unknown key are redirected.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Name of the session cookie carrying the tenant key.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Bootstrap tenant seeded into the credential store at startup.
    #[serde(default)]
    pub seed: Option<SeedTenantConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: default_cache_ttl_days(),
            max_background_tasks: default_max_background_tasks(),
            login_path: default_login_path(),
            session_cookie: default_session_cookie(),
            seed: None,
        }
    }
}

/// A tenant inserted on startup if absent.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedTenantConfig {
    /// Tenant key (also the storage partition name).
    pub tenant_key: String,
    /// Contact email stored with the key.
    #[serde(default)]
    pub email: String,
}

/// Credential store configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetadataConfig {
    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `aws`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// AWS S3 gateway configuration.
    #[serde(default)]
    pub aws: Option<AwsStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            aws: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// AWS S3 gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
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

/// Metrics listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the metrics listener.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Metrics listener host.
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,

    /// Metrics listener port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_host: default_metrics_host(),
            metrics_port: default_metrics_port(),
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
    11682
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_max_file_size() -> u64 {
    1_073_741_824 // 1 GiB
}

fn default_cache_ttl_days() -> u64 {
    14
}

fn default_max_background_tasks() -> usize {
    64
}

fn default_login_path() -> String {
    "/".to_string()
}

fn default_session_cookie() -> String {
    "tenant_key".to_string()
}

fn default_metadata_path() -> String {
    "./data/tenants.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    11680
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
