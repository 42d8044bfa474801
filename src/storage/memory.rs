use std::net::IpAddr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::models::request::RequestRecord;
use crate::models::threat::{BlockEntry, SuspicionVerdict};

use super::{BlockStore, TrafficStore, VerdictStore};

/// In-memory store with the same surface as the SQLite store. Used by tests
/// and available as a no-persistence mode.
pub struct MemoryStore {
    requests: Mutex<Vec<RequestRecord>>,
    blocks: DashMap<IpAddr, BlockEntry>,
    verdicts: Mutex<Vec<SuspicionVerdict>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            blocks: DashMap::new(),
            verdicts: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficStore for MemoryStore {
    fn append(&self, record: &RequestRecord) -> Result<()> {
        self.requests.lock().push(record.clone());
        Ok(())
    }

    fn records_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<RequestRecord>> {
        let mut records: Vec<RequestRecord> = self
            .requests
            .lock()
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .requests
            .lock()
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .count() as u64)
    }
}

impl BlockStore for MemoryStore {
    fn find_active(&self, ip: IpAddr) -> Result<Option<BlockEntry>> {
        Ok(self
            .blocks
            .get(&ip)
            .filter(|entry| entry.active)
            .map(|entry| entry.clone()))
    }

    fn upsert(&self, ip: IpAddr, reason: &str) -> Result<()> {
        self.blocks
            .entry(ip)
            .and_modify(|entry| {
                entry.reason = reason.to_string();
                entry.active = true;
            })
            .or_insert_with(|| BlockEntry {
                ip,
                reason: reason.to_string(),
                active: true,
                created_at: Utc::now(),
            });
        Ok(())
    }

    fn set_active(&self, ip: IpAddr, active: bool) -> Result<bool> {
        match self.blocks.get_mut(&ip) {
            Some(mut entry) if entry.active != active => {
                entry.active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, ip: IpAddr) -> Result<bool> {
        Ok(self.blocks.remove(&ip).is_some())
    }

    fn list(&self) -> Result<Vec<BlockEntry>> {
        let mut entries: Vec<BlockEntry> =
            self.blocks.iter().map(|entry| entry.clone()).collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    fn count_active(&self) -> Result<u64> {
        Ok(self.blocks.iter().filter(|entry| entry.active).count() as u64)
    }
}

impl VerdictStore for MemoryStore {
    fn find_active(&self, ip: IpAddr) -> Result<Option<SuspicionVerdict>> {
        Ok(self
            .verdicts
            .lock()
            .iter()
            .filter(|v| v.ip == ip && v.active)
            .max_by_key(|v| v.detected_at)
            .cloned())
    }

    fn create(&self, verdict: &SuspicionVerdict) -> Result<()> {
        self.verdicts.lock().push(verdict.clone());
        Ok(())
    }

    fn replace_reason(&self, ip: IpAddr, reason: &str) -> Result<()> {
        for v in self.verdicts.lock().iter_mut() {
            if v.ip == ip && v.active {
                v.reason = reason.to_string();
            }
        }
        Ok(())
    }

    fn deactivate_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut affected = 0u64;
        for v in self.verdicts.lock().iter_mut() {
            if v.active && v.detected_at < cutoff {
                v.active = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn list_active(&self) -> Result<Vec<SuspicionVerdict>> {
        let mut active: Vec<SuspicionVerdict> = self
            .verdicts
            .lock()
            .iter()
            .filter(|v| v.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(active)
    }

    fn count_active(&self) -> Result<u64> {
        Ok(self.verdicts.lock().iter().filter(|v| v.active).count() as u64)
    }
}
