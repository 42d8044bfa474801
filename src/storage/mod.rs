pub mod memory;
pub mod sqlite;

use std::net::IpAddr;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::request::RequestRecord;
use crate::models::threat::{BlockEntry, SuspicionVerdict};

/// Append-only log of intercepted requests.
pub trait TrafficStore: Send + Sync {
    fn append(&self, record: &RequestRecord) -> Result<()>;

    /// All records with `timestamp >= cutoff`, oldest first.
    fn records_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<RequestRecord>>;

    fn count_since(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Operator-managed block entries, one per IP.
pub trait BlockStore: Send + Sync {
    fn find_active(&self, ip: IpAddr) -> Result<Option<BlockEntry>>;

    /// Create an active entry, or reactivate and update the reason of an
    /// existing one. The original creation time is preserved.
    fn upsert(&self, ip: IpAddr, reason: &str) -> Result<()>;

    /// Returns true when the flag actually changed.
    fn set_active(&self, ip: IpAddr, active: bool) -> Result<bool>;

    /// Returns true when a row was removed.
    fn delete(&self, ip: IpAddr) -> Result<bool>;

    fn list(&self) -> Result<Vec<BlockEntry>>;

    fn count_active(&self) -> Result<u64>;
}

/// Suspicion verdicts from the anomaly detector. Historical rows per IP are
/// kept; callers maintain at most one active verdict per IP.
pub trait VerdictStore: Send + Sync {
    fn find_active(&self, ip: IpAddr) -> Result<Option<SuspicionVerdict>>;

    fn create(&self, verdict: &SuspicionVerdict) -> Result<()>;

    /// Rewrite the reason of the active verdict for `ip`, leaving its
    /// detection time untouched.
    fn replace_reason(&self, ip: IpAddr, reason: &str) -> Result<()>;

    /// Deactivate every active verdict detected strictly before `cutoff`.
    /// Returns the number of rows affected.
    fn deactivate_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    fn list_active(&self) -> Result<Vec<SuspicionVerdict>>;

    fn count_active(&self) -> Result<u64>;
}
