use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::models::threat::BlockEntry;
use crate::storage::BlockStore;

/// Enforcement wrapper around the block store. Read checks fail open: a
/// store error is logged and treated as not-blocked so traffic keeps
/// flowing when the database is unavailable.
pub struct BlocklistGuard {
    store: Arc<dyn BlockStore>,
}

impl BlocklistGuard {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// True only when an active block entry exists for the exact IP.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        match self.store.find_active(ip) {
            Ok(entry) => entry.is_some(),
            Err(err) => {
                error!(client_ip = %ip, error = %err, "Blocklist lookup failed, allowing request");
                false
            }
        }
    }

    /// Block an IP, or update the reason of an existing entry. Idempotent.
    pub fn block(&self, ip: IpAddr, reason: &str) -> Result<()> {
        self.store.upsert(ip, reason)?;
        info!(client_ip = %ip, reason = %reason, "IP blocked");
        Ok(())
    }

    /// Deactivate the block entry for an IP, or remove the row entirely
    /// when `delete` is set. Returns true when anything changed.
    pub fn unblock(&self, ip: IpAddr, delete: bool) -> Result<bool> {
        let changed = if delete {
            self.store.delete(ip)?
        } else {
            self.store.set_active(ip, false)?
        };
        if changed {
            info!(client_ip = %ip, deleted = delete, "IP unblocked");
        }
        Ok(changed)
    }

    pub fn list(&self) -> Result<Vec<BlockEntry>> {
        self.store.list()
    }

    pub fn count_active(&self) -> Result<u64> {
        self.store.count_active()
    }
}
