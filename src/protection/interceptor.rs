use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, error};

use crate::models::request::RequestRecord;
use crate::storage::TrafficStore;

use super::blocklist::BlocklistGuard;
use super::geo::GeoResolver;

/// Outcome of running one request through the interception pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow { record: RequestRecord },
    Deny { ip: IpAddr },
}

/// Per-request pipeline: client-IP extraction, blocklist check, geolocation,
/// request logging. Runs before any request reaches the upstream.
pub struct RequestInterceptor {
    blocklist: Arc<BlocklistGuard>,
    geo: Arc<GeoResolver>,
    traffic: Arc<dyn TrafficStore>,
}

impl RequestInterceptor {
    pub fn new(
        blocklist: Arc<BlocklistGuard>,
        geo: Arc<GeoResolver>,
        traffic: Arc<dyn TrafficStore>,
    ) -> Self {
        Self {
            blocklist,
            geo,
            traffic,
        }
    }

    pub async fn intercept(
        &self,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        path: &str,
    ) -> Decision {
        let ip = extract_client_ip(headers, peer);

        if self.blocklist.is_blocked(ip) {
            debug!(client_ip = %ip, path = %path, "Request denied by blocklist");
            return Decision::Deny { ip };
        }

        let geo = self.geo.resolve(ip).await;
        let record = RequestRecord::new(ip, path.to_string(), geo.country, geo.city);

        if let Err(err) = self.traffic.append(&record) {
            error!(client_ip = %ip, error = %err, "Failed to persist request record");
        }

        Decision::Allow { record }
    }
}

/// Resolve the client IP: left-most `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer address. Unparseable values fall
/// through to the next source.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> IpAddr {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
            return ip;
        }
    }

    peer.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::geo::{GeoLookup, GeoProvider};
    use crate::storage::memory::MemoryStore;
    use crate::storage::BlockStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoProvider for StaticProvider {
        async fn lookup(&self, _ip: IpAddr) -> Result<GeoLookup> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeoLookup {
                status: "success".to_string(),
                country: Some("Germany".to_string()),
                city: Some("Berlin".to_string()),
            })
        }
    }

    struct FailingTrafficStore;

    impl TrafficStore for FailingTrafficStore {
        fn append(&self, _record: &RequestRecord) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn records_since(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<RequestRecord>> {
            Ok(Vec::new())
        }
        fn count_since(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn interceptor_over(
        store: Arc<MemoryStore>,
        provider: Arc<StaticProvider>,
    ) -> RequestInterceptor {
        let blocklist = Arc::new(BlocklistGuard::new(store.clone()));
        let geo = Arc::new(GeoResolver::new(provider, Duration::from_secs(60)));
        RequestInterceptor::new(blocklist, geo, store)
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.5".parse().unwrap());

        let resolved = extract_client_ip(&headers, Some(ip("192.0.2.1")));
        assert_eq!(resolved, ip("203.0.113.9"));
    }

    #[test]
    fn real_ip_header_used_when_forwarded_is_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.5".parse().unwrap());

        let resolved = extract_client_ip(&headers, Some(ip("192.0.2.1")));
        assert_eq!(resolved, ip("198.51.100.5"));
    }

    #[test]
    fn falls_back_to_peer_then_loopback() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, Some(ip("192.0.2.1"))), ip("192.0.2.1"));
        assert_eq!(extract_client_ip(&headers, None), ip("127.0.0.1"));
    }

    #[tokio::test]
    async fn allowed_request_is_recorded_with_geo() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let interceptor = interceptor_over(store.clone(), provider);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        let decision = interceptor.intercept(&headers, None, "/index").await;
        let record = match decision {
            Decision::Allow { record } => record,
            Decision::Deny { .. } => panic!("request should be allowed"),
        };
        assert_eq!(record.ip, ip("203.0.113.9"));
        assert_eq!(record.country.as_deref(), Some("Germany"));

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
        let stored = crate::storage::TrafficStore::records_since(store.as_ref(), cutoff).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].path, "/index");
    }

    #[tokio::test]
    async fn blocked_ip_is_denied_without_record_or_lookup() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(ip("203.0.113.9"), "abuse").unwrap();
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let interceptor = interceptor_over(store.clone(), provider.clone());

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        let decision = interceptor.intercept(&headers, None, "/index").await;
        assert_eq!(decision, Decision::Deny { ip: ip("203.0.113.9") });
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
        let stored = crate::storage::TrafficStore::records_since(store.as_ref(), cutoff).unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn traffic_store_failure_still_allows() {
        let blocklist = Arc::new(BlocklistGuard::new(Arc::new(MemoryStore::new())));
        let geo = Arc::new(GeoResolver::new(
            Arc::new(StaticProvider {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(60),
        ));
        let interceptor = RequestInterceptor::new(blocklist, geo, Arc::new(FailingTrafficStore));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        let decision = interceptor.intercept(&headers, None, "/index").await;
        assert!(matches!(decision, Decision::Allow { .. }));
    }
}
