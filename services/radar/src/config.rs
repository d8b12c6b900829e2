use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the radar service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    pub api: ApiConfig,
    /// Token signing configuration
    pub auth: AuthConfig,
    /// Search engine configuration
    pub elasticsearch: ElasticsearchConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Image analysis configuration
    pub scoring: ScoringConfig,
    /// Analytics ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Path prefix every route is mounted under
    #[serde(default = "default_api_prefix")]
    pub prefix: String,
    /// Largest accepted request body (multipart uploads included)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Allowed CORS origins (empty = any origin)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Token signing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared by token issuance and verification
    pub signing_secret: String,
    /// Token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

/// Elasticsearch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    /// Cluster URL
    pub url: String,
    /// Index holding posts
    #[serde(default = "default_post_index")]
    pub post_index: String,
    /// Index holding user accounts
    #[serde(default = "default_user_index")]
    pub user_index: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on hits returned by one search
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for post media
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL objects are publicly served from, if not the bucket itself
    pub public_base_url: Option<String>,
    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Image analysis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Prediction endpoint URL
    pub endpoint: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Analytics ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Send a copy of every ingested post to Kafka
    #[serde(default)]
    pub enabled: bool,
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Topic ledger entries are produced to
    #[serde(default = "default_ledger_topic")]
    pub topic: String,
    /// Delivery timeout in milliseconds
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "radar-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024 // 32MB
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_post_index() -> String {
    "post".to_string()
}

fn default_user_index() -> String {
    "user".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_results() -> u32 {
    10_000 // index.max_result_window default
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_ledger_topic() -> String {
    "post-ledger".to_string()
}

fn default_ledger_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "radar-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/radar").required(false))
            .add_source(config::File::with_name("/etc/radar/radar").required(false))
            // Override with environment variables
            // RADAR__AUTH__SIGNING_SECRET -> auth.signing_secret
            .add_source(
                config::Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get token lifetime as a chrono Duration
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.auth.token_ttl_hours)
    }
}

impl ElasticsearchConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScoringConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bootstrap_servers: default_bootstrap_servers(),
            topic: default_ledger_topic(),
            timeout_ms: default_ledger_timeout_ms(),
        }
    }
}
