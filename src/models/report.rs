use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregate traffic report produced by the reporter job.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,

    pub requests_last_hour: u64,

    pub requests_last_day: u64,

    pub active_verdicts: u64,

    pub active_blocks: u64,

    /// Top countries by request count over the last day, capped at 10.
    pub top_countries: Vec<CountryCount>,

    /// Top source tuples by request count over the last day, capped at 10.
    pub top_sources: Vec<SourceCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryCount {
    pub country: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub ip: IpAddr,
    pub country: Option<String>,
    pub city: Option<String>,
    pub count: u64,
}
