use std::net::IpAddr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::request::RequestRecord;
use crate::models::threat::{BlockEntry, SuspicionVerdict};

use super::{BlockStore, TrafficStore, VerdictStore};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed store for request records, block entries, and verdicts.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open sqlite database: {}", path))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS requests (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                ip         TEXT NOT NULL,
                path       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                country    TEXT,
                city       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp);
            CREATE INDEX IF NOT EXISTS idx_requests_ip ON requests(ip);

            CREATE TABLE IF NOT EXISTS blocked_ips (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ip          TEXT NOT NULL,
                reason      TEXT NOT NULL DEFAULT '',
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                UNIQUE(ip)
            );

            CREATE TABLE IF NOT EXISTS suspicious_ips (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                ip           TEXT NOT NULL,
                reason       TEXT NOT NULL,
                active       INTEGER NOT NULL DEFAULT 1,
                detected_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_suspicious_ip_active ON suspicious_ips(ip, active);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_ip(idx: usize, raw: &str) -> rusqlite::Result<IpAddr> {
    raw.parse::<IpAddr>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl TrafficStore for SqliteStore {
    fn append(&self, record: &RequestRecord) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO requests (ip, path, timestamp, country, city)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.ip.to_string(),
                record.path,
                format_ts(record.timestamp),
                record.country,
                record.city,
            ],
        )?;
        Ok(())
    }

    fn records_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<RequestRecord>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, path, timestamp, country, city
             FROM requests
             WHERE timestamp >= ?1
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![format_ts(cutoff)], |row| {
            let ip: String = row.get(0)?;
            let ts: String = row.get(2)?;
            Ok(RequestRecord {
                ip: parse_ip(0, &ip)?,
                path: row.get(1)?,
                timestamp: parse_ts(2, &ts)?,
                country: row.get(3)?,
                city: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read request records")
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE timestamp >= ?1",
            params![format_ts(cutoff)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl BlockStore for SqliteStore {
    fn find_active(&self, ip: IpAddr) -> Result<Option<BlockEntry>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, reason, active, created_at
             FROM blocked_ips
             WHERE ip = ?1 AND active = 1",
        )?;
        let mut rows = stmt.query_map(params![ip.to_string()], map_block_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, ip: IpAddr, reason: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO blocked_ips (ip, reason, active, created_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(ip) DO UPDATE SET reason = excluded.reason, active = 1",
            params![ip.to_string(), reason, format_ts(Utc::now())],
        )?;
        Ok(())
    }

    fn set_active(&self, ip: IpAddr, active: bool) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "UPDATE blocked_ips SET active = ?2 WHERE ip = ?1 AND active != ?2",
            params![ip.to_string(), active as i32],
        )?;
        Ok(changed > 0)
    }

    fn delete(&self, ip: IpAddr) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM blocked_ips WHERE ip = ?1",
            params![ip.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list(&self) -> Result<Vec<BlockEntry>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, reason, active, created_at
             FROM blocked_ips
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], map_block_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read block entries")
    }

    fn count_active(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl VerdictStore for SqliteStore {
    fn find_active(&self, ip: IpAddr) -> Result<Option<SuspicionVerdict>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, reason, active, detected_at
             FROM suspicious_ips
             WHERE ip = ?1 AND active = 1
             ORDER BY detected_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![ip.to_string()], map_verdict_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn create(&self, verdict: &SuspicionVerdict) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO suspicious_ips (ip, reason, active, detected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                verdict.ip.to_string(),
                verdict.reason,
                verdict.active as i32,
                format_ts(verdict.detected_at),
            ],
        )?;
        Ok(())
    }

    fn replace_reason(&self, ip: IpAddr, reason: &str) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "UPDATE suspicious_ips SET reason = ?2 WHERE ip = ?1 AND active = 1",
            params![ip.to_string(), reason],
        )?;
        Ok(())
    }

    fn deactivate_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "UPDATE suspicious_ips SET active = 0 WHERE active = 1 AND detected_at < ?1",
            params![format_ts(cutoff)],
        )?;
        Ok(changed as u64)
    }

    fn list_active(&self) -> Result<Vec<SuspicionVerdict>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, reason, active, detected_at
             FROM suspicious_ips
             WHERE active = 1
             ORDER BY detected_at DESC",
        )?;
        let rows = stmt.query_map([], map_verdict_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read verdicts")
    }

    fn count_active(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM suspicious_ips WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn map_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockEntry> {
    let ip: String = row.get(0)?;
    let created: String = row.get(3)?;
    Ok(BlockEntry {
        ip: parse_ip(0, &ip)?,
        reason: row.get(1)?,
        active: row.get::<_, i32>(2)? != 0,
        created_at: parse_ts(3, &created)?,
    })
}

fn map_verdict_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SuspicionVerdict> {
    let ip: String = row.get(0)?;
    let detected: String = row.get(3)?;
    Ok(SuspicionVerdict {
        ip: parse_ip(0, &ip)?,
        reason: row.get(1)?,
        active: row.get::<_, i32>(2)? != 0,
        detected_at: parse_ts(3, &detected)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteStore {
        SqliteStore::new(":memory:").unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn append_and_query_requests() {
        let s = store();
        let rec = RequestRecord::new(
            ip("203.0.113.9"),
            "/index".to_string(),
            Some("Germany".to_string()),
            Some("Berlin".to_string()),
        );
        s.append(&rec).unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        let records = s.records_since(cutoff).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, ip("203.0.113.9"));
        assert_eq!(records[0].country.as_deref(), Some("Germany"));
        assert_eq!(s.count_since(cutoff).unwrap(), 1);
    }

    #[test]
    fn records_since_excludes_older() {
        let s = store();
        let mut old = RequestRecord::new(ip("203.0.113.9"), "/a".to_string(), None, None);
        old.timestamp = Utc::now() - Duration::hours(3);
        s.append(&old).unwrap();
        s.append(&RequestRecord::new(
            ip("203.0.113.9"),
            "/b".to_string(),
            None,
            None,
        ))
        .unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        let records = s.records_since(cutoff).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/b");
    }

    #[test]
    fn block_upsert_is_idempotent() {
        let s = store();
        s.upsert(ip("198.51.100.1"), "manual").unwrap();
        s.upsert(ip("198.51.100.1"), "updated reason").unwrap();

        let entry = BlockStore::find_active(&s, ip("198.51.100.1"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.reason, "updated reason");
        assert!(entry.active);
        assert_eq!(s.list().unwrap().len(), 1);
        assert_eq!(BlockStore::count_active(&s).unwrap(), 1);
    }

    #[test]
    fn deactivated_block_is_not_found_and_can_reactivate() {
        let s = store();
        s.upsert(ip("198.51.100.1"), "manual").unwrap();

        assert!(s.set_active(ip("198.51.100.1"), false).unwrap());
        assert!(BlockStore::find_active(&s, ip("198.51.100.1"))
            .unwrap()
            .is_none());
        // already inactive, nothing changes
        assert!(!s.set_active(ip("198.51.100.1"), false).unwrap());

        s.upsert(ip("198.51.100.1"), "again").unwrap();
        assert!(BlockStore::find_active(&s, ip("198.51.100.1"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn delete_removes_the_row() {
        let s = store();
        s.upsert(ip("198.51.100.1"), "manual").unwrap();
        assert!(BlockStore::delete(&s, ip("198.51.100.1")).unwrap());
        assert!(!BlockStore::delete(&s, ip("198.51.100.1")).unwrap());
        assert!(s.list().unwrap().is_empty());
    }

    #[test]
    fn verdict_create_replace_and_expire() {
        let s = store();
        let mut v = SuspicionVerdict::new(ip("192.0.2.7"), "first".to_string());
        v.detected_at = Utc::now() - Duration::hours(25);
        s.create(&v).unwrap();

        s.replace_reason(ip("192.0.2.7"), "second").unwrap();
        let active = VerdictStore::find_active(&s, ip("192.0.2.7"))
            .unwrap()
            .unwrap();
        assert_eq!(active.reason, "second");

        let expired = s
            .deactivate_older_than(Utc::now() - Duration::hours(24))
            .unwrap();
        assert_eq!(expired, 1);
        assert!(VerdictStore::find_active(&s, ip("192.0.2.7"))
            .unwrap()
            .is_none());
        assert_eq!(VerdictStore::count_active(&s).unwrap(), 0);
    }

    #[test]
    fn expiry_keeps_recent_verdicts() {
        let s = store();
        s.create(&SuspicionVerdict::new(ip("192.0.2.7"), "fresh".to_string()))
            .unwrap();
        let expired = s
            .deactivate_older_than(Utc::now() - Duration::hours(24))
            .unwrap();
        assert_eq!(expired, 0);
        assert_eq!(s.list_active().unwrap().len(), 1);
    }

    #[test]
    fn historical_verdict_rows_are_kept() {
        let s = store();
        let mut old = SuspicionVerdict::new(ip("192.0.2.7"), "old".to_string());
        old.active = false;
        old.detected_at = Utc::now() - Duration::days(3);
        s.create(&old).unwrap();
        s.create(&SuspicionVerdict::new(ip("192.0.2.7"), "new".to_string()))
            .unwrap();

        let active = VerdictStore::find_active(&s, ip("192.0.2.7"))
            .unwrap()
            .unwrap();
        assert_eq!(active.reason, "new");
        assert_eq!(s.list_active().unwrap().len(), 1);
    }
}
