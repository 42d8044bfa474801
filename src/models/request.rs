use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logged request, as persisted by the interception pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub ip: IpAddr,

    /// Request path, query string excluded.
    pub path: String,

    pub timestamp: DateTime<Utc>,

    /// Country name resolved at intercept time, if any.
    pub country: Option<String>,

    /// City name resolved at intercept time, if any.
    pub city: Option<String>,
}

impl RequestRecord {
    pub fn new(ip: IpAddr, path: String, country: Option<String>, city: Option<String>) -> Self {
        Self {
            ip,
            path,
            timestamp: Utc::now(),
            country,
            city,
        }
    }
}
