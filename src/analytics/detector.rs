use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::models::threat::{DetectionSummary, SuspicionVerdict};
use crate::storage::{TrafficStore, VerdictStore};

/// Per-IP activity aggregated over the scan window.
struct IpActivity {
    total: u64,
    sensitive_hits: u64,
    sensitive_paths: BTreeSet<String>,
}

/// Scans the trailing request window and maintains suspicion verdicts.
/// High-volume IPs get their active verdict refreshed in place; IPs flagged
/// only for sensitive-path access get a verdict created only when none is
/// active yet.
pub struct AnomalyDetector {
    traffic: Arc<dyn TrafficStore>,
    verdicts: Arc<dyn VerdictStore>,
    window_secs: u64,
    volume_threshold: u64,
    sensitive_paths: Vec<String>,
}

impl AnomalyDetector {
    pub fn new(
        traffic: Arc<dyn TrafficStore>,
        verdicts: Arc<dyn VerdictStore>,
        window_secs: u64,
        volume_threshold: u64,
        sensitive_paths: Vec<String>,
    ) -> Self {
        Self {
            traffic,
            verdicts,
            window_secs,
            volume_threshold,
            sensitive_paths,
        }
    }

    /// Run one detection pass. A store failure for one IP is logged and does
    /// not abort the rest of the pass.
    pub fn run_once(&self) -> Result<DetectionSummary> {
        let cutoff = Utc::now() - Duration::seconds(self.window_secs as i64);
        let records = self.traffic.records_since(cutoff)?;

        let mut by_ip: HashMap<IpAddr, IpActivity> = HashMap::new();
        for record in &records {
            let activity = by_ip.entry(record.ip).or_insert_with(|| IpActivity {
                total: 0,
                sensitive_hits: 0,
                sensitive_paths: BTreeSet::new(),
            });
            activity.total += 1;
            if let Some(sensitive) = self
                .sensitive_paths
                .iter()
                .find(|p| record.path.starts_with(p.as_str()))
            {
                activity.sensitive_hits += 1;
                activity.sensitive_paths.insert(sensitive.clone());
            }
        }

        let mut summary = DetectionSummary {
            scanned_ips: by_ip.len() as u64,
            ..DetectionSummary::default()
        };

        for (ip, activity) in &by_ip {
            if let Err(err) = self.process_ip(*ip, activity, &mut summary) {
                warn!(client_ip = %ip, error = %err, "Failed to process IP, continuing");
            }
        }

        info!(
            scanned_ips = summary.scanned_ips,
            created = summary.created,
            updated = summary.updated,
            high_volume = summary.high_volume,
            sensitive_access = summary.sensitive_access,
            "Anomaly detection pass finished"
        );

        Ok(summary)
    }

    fn process_ip(
        &self,
        ip: IpAddr,
        activity: &IpActivity,
        summary: &mut DetectionSummary,
    ) -> Result<()> {
        let high_volume = activity.total > self.volume_threshold;
        let sensitive = !activity.sensitive_paths.is_empty();

        if high_volume {
            summary.high_volume += 1;
        }
        if sensitive {
            summary.sensitive_access += 1;
        }

        if high_volume {
            let mut reason = format!("High volume: {} requests in 1 hour", activity.total);
            if sensitive {
                reason.push_str(&format!(
                    " + accessed sensitive paths: {}",
                    join_paths(&activity.sensitive_paths)
                ));
            }
            match self.verdicts.find_active(ip)? {
                Some(_) => {
                    self.verdicts.replace_reason(ip, &reason)?;
                    summary.updated += 1;
                }
                None => {
                    self.verdicts.create(&SuspicionVerdict::new(ip, reason))?;
                    summary.created += 1;
                }
            }
        } else if sensitive && self.verdicts.find_active(ip)?.is_none() {
            let reason = format!(
                "Accessed sensitive paths: {} ({} times)",
                join_paths(&activity.sensitive_paths),
                activity.sensitive_hits
            );
            self.verdicts.create(&SuspicionVerdict::new(ip, reason))?;
            summary.created += 1;
        }

        Ok(())
    }
}

fn join_paths(paths: &BTreeSet<String>) -> String {
    paths.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RequestRecord;
    use crate::storage::memory::MemoryStore;
    use anyhow::anyhow;
    use chrono::DateTime;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn sensitive() -> Vec<String> {
        vec![
            "/admin/".to_string(),
            "/login/".to_string(),
            "/sensitive-data/".to_string(),
            "/admin-dashboard/".to_string(),
        ]
    }

    fn detector(store: Arc<MemoryStore>) -> AnomalyDetector {
        AnomalyDetector::new(store.clone(), store, 3600, 100, sensitive())
    }

    fn log_requests(store: &MemoryStore, ip: IpAddr, path: &str, count: usize) {
        for _ in 0..count {
            store
                .append(&RequestRecord::new(ip, path.to_string(), None, None))
                .unwrap();
        }
    }

    #[test]
    fn volume_over_threshold_creates_verdict() {
        let store = Arc::new(MemoryStore::new());
        log_requests(&store, ip("203.0.113.9"), "/index", 101);

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.scanned_ips, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.high_volume, 1);

        let verdict = VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .unwrap();
        assert_eq!(verdict.reason, "High volume: 101 requests in 1 hour");
    }

    #[test]
    fn volume_at_threshold_is_not_flagged() {
        let store = Arc::new(MemoryStore::new());
        log_requests(&store, ip("203.0.113.9"), "/index", 100);

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.high_volume, 0);
        assert!(VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn sensitive_access_creates_verdict_with_hit_count() {
        let store = Arc::new(MemoryStore::new());
        log_requests(&store, ip("203.0.113.9"), "/admin/users", 2);
        log_requests(&store, ip("203.0.113.9"), "/index", 3);

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.sensitive_access, 1);

        let verdict = VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .unwrap();
        assert_eq!(verdict.reason, "Accessed sensitive paths: /admin/ (2 times)");
    }

    #[test]
    fn sensitive_only_never_touches_existing_verdict() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(&SuspicionVerdict::new(
                ip("203.0.113.9"),
                "preexisting".to_string(),
            ))
            .unwrap();
        log_requests(&store, ip("203.0.113.9"), "/login/", 5);

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);

        let verdict = VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .unwrap();
        assert_eq!(verdict.reason, "preexisting");
    }

    #[test]
    fn high_volume_refreshes_existing_verdict_reason() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(&SuspicionVerdict::new(
                ip("203.0.113.9"),
                "stale reason".to_string(),
            ))
            .unwrap();
        log_requests(&store, ip("203.0.113.9"), "/index", 150);

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 0);

        let verdict = VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .unwrap();
        assert_eq!(verdict.reason, "High volume: 150 requests in 1 hour");
    }

    #[test]
    fn combined_reason_lists_sensitive_paths() {
        let store = Arc::new(MemoryStore::new());
        log_requests(&store, ip("203.0.113.9"), "/login/", 60);
        log_requests(&store, ip("203.0.113.9"), "/admin/", 60);

        detector(store.clone()).run_once().unwrap();

        let verdict = VerdictStore::find_active(store.as_ref(), ip("203.0.113.9"))
            .unwrap()
            .unwrap();
        assert_eq!(
            verdict.reason,
            "High volume: 120 requests in 1 hour + accessed sensitive paths: /admin/, /login/"
        );
    }

    #[test]
    fn rerun_over_same_window_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        log_requests(&store, ip("203.0.113.9"), "/index", 150);
        log_requests(&store, ip("198.51.100.7"), "/admin/", 1);

        let d = detector(store.clone());
        let first = d.run_once().unwrap();
        assert_eq!(first.created, 2);

        let second = d.run_once().unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(VerdictStore::count_active(store.as_ref()).unwrap(), 2);
    }

    #[test]
    fn old_records_fall_outside_the_window() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..150 {
            let mut rec = RequestRecord::new(ip("203.0.113.9"), "/index".to_string(), None, None);
            rec.timestamp = Utc::now() - Duration::hours(2);
            store.append(&rec).unwrap();
        }

        let summary = detector(store.clone()).run_once().unwrap();
        assert_eq!(summary.scanned_ips, 0);
        assert_eq!(summary.created, 0);
    }

    struct FlakyVerdictStore {
        inner: MemoryStore,
        poison: IpAddr,
    }

    impl VerdictStore for FlakyVerdictStore {
        fn find_active(&self, ip: IpAddr) -> Result<Option<SuspicionVerdict>> {
            if ip == self.poison {
                return Err(anyhow!("row locked"));
            }
            VerdictStore::find_active(&self.inner, ip)
        }
        fn create(&self, verdict: &SuspicionVerdict) -> Result<()> {
            self.inner.create(verdict)
        }
        fn replace_reason(&self, ip: IpAddr, reason: &str) -> Result<()> {
            self.inner.replace_reason(ip, reason)
        }
        fn deactivate_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            self.inner.deactivate_older_than(cutoff)
        }
        fn list_active(&self) -> Result<Vec<SuspicionVerdict>> {
            self.inner.list_active()
        }
        fn count_active(&self) -> Result<u64> {
            VerdictStore::count_active(&self.inner)
        }
    }

    #[test]
    fn failure_for_one_ip_does_not_abort_the_pass() {
        let traffic = Arc::new(MemoryStore::new());
        log_requests(&traffic, ip("203.0.113.9"), "/index", 150);
        log_requests(&traffic, ip("198.51.100.7"), "/index", 150);

        let verdicts = Arc::new(FlakyVerdictStore {
            inner: MemoryStore::new(),
            poison: ip("203.0.113.9"),
        });
        let d = AnomalyDetector::new(traffic, verdicts.clone(), 3600, 100, sensitive());

        let summary = d.run_once().unwrap();
        assert_eq!(summary.created, 1);
        assert!(VerdictStore::find_active(verdicts.as_ref(), ip("198.51.100.7"))
            .unwrap()
            .is_some());
    }
}
