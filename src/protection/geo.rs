use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

/// Resolved location for an IP. Both fields stay empty for non-routable
/// addresses and failed lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Payload returned by the geolocation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoLookup {
    #[serde(default)]
    pub status: String,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLookup>;
}

/// Provider backed by an external HTTP JSON geolocation service
/// (`GET {endpoint}/{ip}`), with a bounded request timeout.
pub struct HttpGeoProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGeoProvider {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLookup> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), ip);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<GeoLookup>().await?)
    }
}

/// Caching resolver in front of a `GeoProvider`. Successful lookups are
/// cached per IP with a TTL; failures are never cached so the next request
/// retries. Non-routable addresses short-circuit without a provider call.
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    cache: DashMap<IpAddr, (GeoInfo, Instant)>,
    ttl: Duration,
}

impl GeoResolver {
    pub fn new(provider: Arc<dyn GeoProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> GeoInfo {
        if is_non_routable(ip) {
            return GeoInfo::default();
        }

        if let Some(entry) = self.cache.get(&ip) {
            let (info, inserted) = entry.value();
            if inserted.elapsed() < self.ttl {
                return info.clone();
            }
            drop(entry);
            self.cache.remove(&ip);
        }

        match self.provider.lookup(ip).await {
            Ok(lookup) if lookup.status == "success" => {
                let info = GeoInfo {
                    country: lookup.country,
                    city: lookup.city,
                };
                self.cache.insert(ip, (info.clone(), Instant::now()));
                debug!(client_ip = %ip, country = ?info.country, "Geolocation resolved");
                info
            }
            Ok(lookup) => {
                warn!(client_ip = %ip, status = %lookup.status, "Geolocation lookup rejected");
                GeoInfo::default()
            }
            Err(err) => {
                warn!(client_ip = %ip, error = %err, "Geolocation lookup failed");
                GeoInfo::default()
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Private, loopback, link-local, and unspecified addresses never reach the
/// external service.
fn is_non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            // fc00::/7 unique-local, fe80::/10 link-local
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
