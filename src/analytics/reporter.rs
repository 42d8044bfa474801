use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::models::report::{CountryCount, SecurityReport, SourceCount};
use crate::storage::{BlockStore, TrafficStore, VerdictStore};

const TOP_LIMIT: usize = 10;

/// Read-only report generator. Aggregates traffic counts, active verdict and
/// block counts, and the day's top countries and sources. The most recent
/// report is retained for the admin API.
pub struct ReportGenerator {
    traffic: Arc<dyn TrafficStore>,
    verdicts: Arc<dyn VerdictStore>,
    blocks: Arc<dyn BlockStore>,
    latest: Mutex<Option<SecurityReport>>,
}

impl ReportGenerator {
    pub fn new(
        traffic: Arc<dyn TrafficStore>,
        verdicts: Arc<dyn VerdictStore>,
        blocks: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            traffic,
            verdicts,
            blocks,
            latest: Mutex::new(None),
        }
    }

    pub fn generate(&self) -> Result<SecurityReport> {
        let now = Utc::now();
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);

        let requests_last_hour = self.traffic.count_since(hour_ago)?;
        let day_records = self.traffic.records_since(day_ago)?;

        let mut country_counts: HashMap<String, u64> = HashMap::new();
        let mut source_counts: HashMap<IpAddr, (Option<String>, Option<String>, u64)> =
            HashMap::new();
        for record in &day_records {
            if let Some(ref country) = record.country {
                *country_counts.entry(country.clone()).or_insert(0) += 1;
            }
            let entry = source_counts
                .entry(record.ip)
                .or_insert_with(|| (record.country.clone(), record.city.clone(), 0));
            entry.2 += 1;
        }

        let mut top_countries: Vec<CountryCount> = country_counts
            .into_iter()
            .map(|(country, count)| CountryCount { country, count })
            .collect();
        top_countries.sort_by(|a, b| b.count.cmp(&a.count).then(a.country.cmp(&b.country)));
        top_countries.truncate(TOP_LIMIT);

        let mut top_sources: Vec<SourceCount> = source_counts
            .into_iter()
            .map(|(ip, (country, city, count))| SourceCount {
                ip,
                country,
                city,
                count,
            })
            .collect();
        top_sources.sort_by(|a, b| b.count.cmp(&a.count).then(a.ip.cmp(&b.ip)));
        top_sources.truncate(TOP_LIMIT);

        let report = SecurityReport {
            generated_at: now,
            requests_last_hour,
            requests_last_day: day_records.len() as u64,
            active_verdicts: self.verdicts.count_active()?,
            active_blocks: self.blocks.count_active()?,
            top_countries,
            top_sources,
        };

        info!(
            requests_last_hour = report.requests_last_hour,
            requests_last_day = report.requests_last_day,
            active_verdicts = report.active_verdicts,
            active_blocks = report.active_blocks,
            top_countries = report.top_countries.len(),
            "Traffic report generated"
        );

        *self.latest.lock() = Some(report.clone());
        Ok(report)
    }

    pub fn latest(&self) -> Option<SecurityReport> {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RequestRecord;
    use crate::models::threat::SuspicionVerdict;
    use crate::storage::memory::MemoryStore;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn reporter(store: Arc<MemoryStore>) -> ReportGenerator {
        ReportGenerator::new(store.clone(), store.clone(), store)
    }

    fn log(store: &MemoryStore, ip: IpAddr, country: Option<&str>, count: usize) {
        for _ in 0..count {
            store
                .append(&RequestRecord::new(
                    ip,
                    "/index".to_string(),
                    country.map(str::to_string),
                    None,
                ))
                .unwrap();
        }
    }

    #[test]
    fn counts_and_toplists_are_computed() {
        let store = Arc::new(MemoryStore::new());
        log(&store, ip("203.0.113.9"), Some("Germany"), 5);
        log(&store, ip("198.51.100.7"), Some("France"), 3);
        log(&store, ip("192.0.2.44"), None, 2);

        let mut old = RequestRecord::new(ip("203.0.113.9"), "/old".to_string(), None, None);
        old.timestamp = Utc::now() - Duration::hours(30);
        store.append(&old).unwrap();

        store
            .create(&SuspicionVerdict::new(ip("192.0.2.44"), "sus".to_string()))
            .unwrap();
        store.upsert(ip("198.51.100.200"), "manual").unwrap();

        let report = reporter(store).generate().unwrap();
        assert_eq!(report.requests_last_hour, 10);
        assert_eq!(report.requests_last_day, 10);
        assert_eq!(report.active_verdicts, 1);
        assert_eq!(report.active_blocks, 1);

        assert_eq!(report.top_countries[0].country, "Germany");
        assert_eq!(report.top_countries[0].count, 5);
        // records without a country are excluded from the country toplist
        assert_eq!(report.top_countries.len(), 2);

        assert_eq!(report.top_sources[0].ip, ip("203.0.113.9"));
        assert_eq!(report.top_sources[0].count, 5);
        assert_eq!(report.top_sources.len(), 3);
    }

    #[test]
    fn toplists_are_capped_at_ten() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..15u8 {
            let addr: IpAddr = format!("203.0.113.{}", i + 1).parse().unwrap();
            log(&store, addr, Some(&format!("Country{}", i)), (i + 1) as usize);
        }

        let report = reporter(store).generate().unwrap();
        assert_eq!(report.top_countries.len(), 10);
        assert_eq!(report.top_sources.len(), 10);
        // sorted descending
        assert_eq!(report.top_sources[0].count, 15);
        assert!(report
            .top_countries
            .windows(2)
            .all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn country_ties_break_by_name() {
        let store = Arc::new(MemoryStore::new());
        log(&store, ip("203.0.113.1"), Some("Brazil"), 2);
        log(&store, ip("203.0.113.2"), Some("Austria"), 2);

        let report = reporter(store).generate().unwrap();
        assert_eq!(report.top_countries[0].country, "Austria");
        assert_eq!(report.top_countries[1].country, "Brazil");
    }

    #[test]
    fn latest_report_is_retained() {
        let store = Arc::new(MemoryStore::new());
        let gen = reporter(store);
        assert!(gen.latest().is_none());

        gen.generate().unwrap();
        assert!(gen.latest().is_some());
    }
}
