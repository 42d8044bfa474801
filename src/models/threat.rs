use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A manual or operator-driven block entry. One entry per IP; blocking an
/// already-known IP updates the existing entry in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub ip: IpAddr,

    pub reason: String,

    /// Only active entries deny traffic.
    pub active: bool,

    pub created_at: DateTime<Utc>,
}

/// A suspicion verdict produced by the anomaly detector. Historical rows per
/// IP are kept; the detector maintains at most one active verdict per IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspicionVerdict {
    pub ip: IpAddr,

    pub reason: String,

    pub active: bool,

    pub detected_at: DateTime<Utc>,
}

impl SuspicionVerdict {
    pub fn new(ip: IpAddr, reason: String) -> Self {
        Self {
            ip,
            reason,
            active: true,
            detected_at: Utc::now(),
        }
    }
}

/// Outcome of one anomaly-detection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    /// Distinct IPs seen in the scan window.
    pub scanned_ips: u64,

    /// Verdicts newly created this run.
    pub created: u64,

    /// Existing active verdicts whose reason was refreshed.
    pub updated: u64,

    /// IPs over the volume threshold.
    pub high_volume: u64,

    /// IPs that touched at least one sensitive path.
    pub sensitive_access: u64,
}
