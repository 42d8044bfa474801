mod admin_api;
mod analytics;
mod config;
mod models;
mod protection;
mod proxy;
mod storage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::admin_api::routes::AppState;
use crate::admin_api::server::AdminApiServer;
use crate::analytics::detector::AnomalyDetector;
use crate::analytics::expirer::VerdictExpirer;
use crate::analytics::reporter::ReportGenerator;
use crate::analytics::scheduler::AnalyticsScheduler;
use crate::config::settings::Settings;
use crate::protection::blocklist::BlocklistGuard;
use crate::protection::geo::{GeoResolver, HttpGeoProvider};
use crate::protection::interceptor::RequestInterceptor;
use crate::proxy::http_handler::HttpHandler;
use crate::proxy::server::ProxyServer;
use crate::storage::sqlite::SqliteStore;

/// Parse the `--config` CLI flag. Defaults to `/etc/vigil/vigil.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("/etc/vigil/vigil.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with both stdout and file output.
fn init_tracing(log_path: &str, level: &str) {
    if let Some(parent) = std::path::Path::new(log_path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .expect("Failed to open log file");

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let config_exists = std::path::Path::new(&config_path).exists();
    let settings = if config_exists {
        Settings::load(&config_path)?
    } else {
        Settings::default()
    };
    let settings = Arc::new(settings);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    init_tracing(&settings.logging.file, &settings.logging.level);

    info!("Starting Vigil traffic-tracking proxy");
    if config_exists {
        info!("Config loaded from {}", config_path);
    } else {
        warn!("Config file {} not found, using built-in defaults", config_path);
    }

    // ---------------------------------------------------------------
    // 3. Storage
    // ---------------------------------------------------------------
    let sqlite = Arc::new(
        SqliteStore::new(&settings.storage.sqlite_path)
            .expect("Failed to initialise SQLite store"),
    );
    info!("Storage layer initialised");

    // ---------------------------------------------------------------
    // 4. Protection components
    // ---------------------------------------------------------------
    let blocklist = Arc::new(BlocklistGuard::new(sqlite.clone()));

    let geo_provider = Arc::new(HttpGeoProvider::new(
        settings.geo.endpoint.clone(),
        Duration::from_millis(settings.geo.timeout_ms),
    )?);
    let geo = Arc::new(GeoResolver::new(
        geo_provider,
        Duration::from_secs(settings.geo.cache_ttl_secs),
    ));

    let interceptor = Arc::new(RequestInterceptor::new(
        blocklist.clone(),
        geo.clone(),
        sqlite.clone(),
    ));

    info!("Interception pipeline initialised");

    // ---------------------------------------------------------------
    // 5. Front server
    // ---------------------------------------------------------------
    let http_handler = Arc::new(HttpHandler::new(interceptor, &settings));
    let proxy_server = ProxyServer::new(settings.clone(), http_handler);

    info!("Front server configured");

    // ---------------------------------------------------------------
    // 6. Analytics jobs
    // ---------------------------------------------------------------
    let detector = Arc::new(AnomalyDetector::new(
        sqlite.clone(),
        sqlite.clone(),
        settings.detection.window_secs,
        settings.detection.volume_threshold,
        settings.detection.sensitive_paths.clone(),
    ));
    let expirer = Arc::new(VerdictExpirer::new(
        sqlite.clone(),
        settings.retention.verdict_ttl_secs,
    ));
    let reporter = Arc::new(ReportGenerator::new(
        sqlite.clone(),
        sqlite.clone(),
        sqlite.clone(),
    ));
    let scheduler = AnalyticsScheduler::new(
        detector.clone(),
        expirer,
        reporter.clone(),
        &settings,
    );

    // ---------------------------------------------------------------
    // 7. Admin API
    // ---------------------------------------------------------------
    let admin_state = AppState {
        blocklist: blocklist.clone(),
        verdicts: sqlite.clone(),
        detector,
        reporter,
        start_time: Instant::now(),
        api_key: settings.admin_api.api_key.clone(),
    };

    let admin_bind = settings.admin_api.bind.clone();
    let admin_server = AdminApiServer::new(admin_state, admin_bind.clone());
    info!("Admin API will listen on {}", admin_bind);

    // ---------------------------------------------------------------
    // 8. Spawn everything
    // ---------------------------------------------------------------
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy_server.run().await {
            error!("Front server error: {}", e);
        }
    });

    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!("Admin API server error: {}", e);
        }
    });

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });

    info!("Vigil is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 9. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Vigil...");

    proxy_handle.abort();
    admin_handle.abort();
    scheduler_handle.abort();

    info!("Vigil shut down gracefully");
    Ok(())
}
