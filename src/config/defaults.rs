use super::settings::{
    AdminApiConfig, DetectionConfig, GeoConfig, LoggingConfig, ReportConfig, RetentionConfig,
    ServerConfig, StorageConfig, UpstreamConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind_http: default_bind_http(),
        max_connections: default_max_connections(),
    }
}

pub fn default_upstream_config() -> UpstreamConfig {
    UpstreamConfig {
        address: default_upstream_address(),
        max_idle_per_host: default_upstream_max_idle(),
    }
}

pub fn default_admin_api_config() -> AdminApiConfig {
    AdminApiConfig {
        bind: default_admin_bind(),
        api_key: default_api_key(),
    }
}

pub fn default_geo_config() -> GeoConfig {
    GeoConfig {
        endpoint: default_geo_endpoint(),
        timeout_ms: default_geo_timeout_ms(),
        cache_ttl_secs: default_geo_cache_ttl_secs(),
    }
}

pub fn default_detection_config() -> DetectionConfig {
    DetectionConfig {
        window_secs: default_detection_window_secs(),
        volume_threshold: default_volume_threshold(),
        sensitive_paths: default_sensitive_paths(),
        interval_secs: default_detection_interval_secs(),
    }
}

pub fn default_retention_config() -> RetentionConfig {
    RetentionConfig {
        verdict_ttl_secs: default_verdict_ttl_secs(),
        expire_interval_secs: default_expire_interval_secs(),
    }
}

pub fn default_report_config() -> ReportConfig {
    ReportConfig {
        interval_secs: default_report_interval_secs(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
        access_log: default_access_log(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub fn default_bind_http() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn default_max_connections() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

pub fn default_upstream_address() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn default_upstream_max_idle() -> usize {
    128
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

pub fn default_admin_bind() -> String {
    "127.0.0.1:9090".to_string()
}

pub fn default_api_key() -> String {
    "change-me".to_string()
}

// ---------------------------------------------------------------------------
// Geolocation
// ---------------------------------------------------------------------------

pub fn default_geo_endpoint() -> String {
    "http://ip-api.com/json".to_string()
}

pub fn default_geo_timeout_ms() -> u64 {
    3_000
}

/// Resolved entries stay cached for a full day.
pub fn default_geo_cache_ttl_secs() -> u64 {
    86_400
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

pub fn default_detection_window_secs() -> u64 {
    3_600
}

pub fn default_volume_threshold() -> u64 {
    100
}

pub fn default_sensitive_paths() -> Vec<String> {
    vec![
        "/admin/".to_string(),
        "/login/".to_string(),
        "/sensitive-data/".to_string(),
        "/admin-dashboard/".to_string(),
    ]
}

pub fn default_detection_interval_secs() -> u64 {
    3_600
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

pub fn default_verdict_ttl_secs() -> u64 {
    86_400
}

pub fn default_expire_interval_secs() -> u64 {
    21_600
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

pub fn default_report_interval_secs() -> u64 {
    86_400
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

pub fn default_log_level() -> String {
    "info,vigil=debug".to_string()
}

pub fn default_log_file() -> String {
    "/var/log/vigil/vigil.log".to_string()
}

pub fn default_access_log() -> String {
    "/var/log/vigil/access.log".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

pub fn default_sqlite_path() -> String {
    "/var/lib/vigil/vigil.db".to_string()
}
