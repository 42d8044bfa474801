use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the Vigil traffic-tracking service.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_upstream_config")]
    pub upstream: UpstreamConfig,

    #[serde(default = "defaults::default_admin_api_config")]
    pub admin_api: AdminApiConfig,

    #[serde(default = "defaults::default_geo_config")]
    pub geo: GeoConfig,

    #[serde(default = "defaults::default_detection_config")]
    pub detection: DetectionConfig,

    #[serde(default = "defaults::default_retention_config")]
    pub retention: RetentionConfig,

    #[serde(default = "defaults::default_report_config")]
    pub report: ReportConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            upstream: defaults::default_upstream_config(),
            admin_api: defaults::default_admin_api_config(),
            geo: defaults::default_geo_config(),
            detection: defaults::default_detection_config(),
            retention: defaults::default_retention_config(),
            report: defaults::default_report_config(),
            logging: defaults::default_logging_config(),
            storage: defaults::default_storage_config(),
        }
    }
}

/// Front HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind_http")]
    pub bind_http: String,

    #[serde(default = "defaults::default_max_connections")]
    pub max_connections: usize,
}

/// Upstream backend server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "defaults::default_upstream_address")]
    pub address: String,

    #[serde(default = "defaults::default_upstream_max_idle")]
    pub max_idle_per_host: usize,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default = "defaults::default_admin_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Geolocation service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "defaults::default_geo_endpoint")]
    pub endpoint: String,

    #[serde(default = "defaults::default_geo_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "defaults::default_geo_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Anomaly detection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "defaults::default_detection_window_secs")]
    pub window_secs: u64,

    #[serde(default = "defaults::default_volume_threshold")]
    pub volume_threshold: u64,

    #[serde(default = "defaults::default_sensitive_paths")]
    pub sensitive_paths: Vec<String>,

    #[serde(default = "defaults::default_detection_interval_secs")]
    pub interval_secs: u64,
}

/// Verdict retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "defaults::default_verdict_ttl_secs")]
    pub verdict_ttl_secs: u64,

    #[serde(default = "defaults::default_expire_interval_secs")]
    pub expire_interval_secs: u64,
}

/// Report generation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "defaults::default_report_interval_secs")]
    pub interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,

    #[serde(default = "defaults::default_access_log")]
    pub access_log: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}
