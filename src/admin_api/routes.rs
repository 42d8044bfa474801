use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analytics::detector::AnomalyDetector;
use crate::analytics::reporter::ReportGenerator;
use crate::protection::blocklist::BlocklistGuard;
use crate::storage::VerdictStore;

/// Shared state handed to every admin route.
#[derive(Clone)]
pub struct AppState {
    pub blocklist: Arc<BlocklistGuard>,
    pub verdicts: Arc<dyn VerdictStore>,
    pub detector: Arc<AnomalyDetector>,
    pub reporter: Arc<ReportGenerator>,
    pub start_time: Instant,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub ip: String,
    pub delete: Option<bool>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();

    let active_blocks = match state.blocklist.count_active() {
        Ok(n) => n,
        Err(e) => return Json(json!({ "error": format!("{}", e) })),
    };
    let active_verdicts = match state.verdicts.count_active() {
        Ok(n) => n,
        Err(e) => return Json(json!({ "error": format!("{}", e) })),
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "active_blocks": active_blocks,
        "active_verdicts": active_verdicts,
    }))
}

pub async fn block_ip(
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> impl IntoResponse {
    let addr: IpAddr = match body.ip.parse() {
        Ok(a) => a,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid IP address" })),
            )
                .into_response()
        }
    };

    let reason = body.reason.as_deref().unwrap_or("manual");
    match state.blocklist.block(addr, reason) {
        Ok(()) => Json(json!({ "status": "blocked", "ip": body.ip })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Json(body): Json<UnblockRequest>,
) -> impl IntoResponse {
    let addr: IpAddr = match body.ip.parse() {
        Ok(a) => a,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid IP address" })),
            )
                .into_response()
        }
    };

    match state.blocklist.unblock(addr, body.delete.unwrap_or(false)) {
        Ok(true) => Json(json!({ "status": "unblocked", "ip": body.ip })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "IP not found in blocklist" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}

pub async fn get_blocked(State(state): State<AppState>) -> Json<Value> {
    match state.blocklist.list() {
        Ok(entries) => Json(json!({ "entries": entries })),
        Err(e) => Json(json!({ "error": format!("{}", e) })),
    }
}

pub async fn get_suspicious(State(state): State<AppState>) -> Json<Value> {
    match state.verdicts.list_active() {
        Ok(verdicts) => Json(json!({ "verdicts": verdicts })),
        Err(e) => Json(json!({ "error": format!("{}", e) })),
    }
}

/// Return the most recent traffic report, generating one on demand when no
/// scheduled run has happened yet.
pub async fn get_report(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(report) = state.reporter.latest() {
        return Json(json!(report)).into_response();
    }

    match state.reporter.generate() {
        Ok(report) => Json(json!(report)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}

/// Trigger an immediate anomaly-detection pass.
pub async fn run_detection(State(state): State<AppState>) -> impl IntoResponse {
    match state.detector.run_once() {
        Ok(summary) => Json(json!(summary)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}
