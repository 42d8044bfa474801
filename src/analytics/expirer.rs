use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::storage::VerdictStore;

/// Deactivates suspicion verdicts older than the retention TTL in one bulk
/// store operation per pass.
pub struct VerdictExpirer {
    verdicts: Arc<dyn VerdictStore>,
    ttl_secs: u64,
}

impl VerdictExpirer {
    pub fn new(verdicts: Arc<dyn VerdictStore>, ttl_secs: u64) -> Self {
        Self { verdicts, ttl_secs }
    }

    /// Returns the number of verdicts deactivated.
    pub fn run_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(self.ttl_secs as i64);
        let expired = self.verdicts.deactivate_older_than(cutoff)?;
        if expired > 0 {
            info!(expired, "Stale verdicts deactivated");
        } else {
            debug!("No stale verdicts to deactivate");
        }
        Ok(expired)
    }
}
