use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, info, warn};

use crate::config::settings::Settings;
use crate::protection::interceptor::{Decision, RequestInterceptor};

use super::access_log::AccessLogger;

const DENIED_BODY: &str = "Access denied. Your IP address has been blocked.";

/// Headers that must not be forwarded upstream: hop-by-hop headers and the
/// proxy headers the handler sets itself.
const SKIP_HEADERS: &[&str] = &[
    "host",
    "x-forwarded-for",
    "x-real-ip",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-forwarded-port",
    "transfer-encoding",
    "connection",
];

/// Core HTTP request handler for the Vigil front server.
///
/// For every incoming request the handler runs the interception pipeline
/// (client-IP extraction, blocklist check, geolocation, request logging),
/// then either returns a `403` deny page or forwards the request to the
/// upstream backend over a pooled hyper client.
pub struct HttpHandler {
    interceptor: Arc<RequestInterceptor>,
    upstream_client: HyperClient<HttpConnector, Full<Bytes>>,
    upstream_addr: String,
    access_log: Option<Arc<AccessLogger>>,
}

impl HttpHandler {
    pub fn new(interceptor: Arc<RequestInterceptor>, settings: &Settings) -> Self {
        let upstream_client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(settings.upstream.max_idle_per_host)
            .build_http();

        let access_log = if !settings.logging.access_log.is_empty() {
            match AccessLogger::new(&settings.logging.access_log) {
                Ok(logger) => {
                    info!("Access log enabled: {}", settings.logging.access_log);
                    Some(Arc::new(logger))
                }
                Err(e) => {
                    error!(
                        "Failed to open access log {}: {}",
                        settings.logging.access_log, e
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            interceptor,
            upstream_client,
            upstream_addr: settings.upstream.address.clone(),
            access_log,
        }
    }

    /// Process a single inbound HTTP request end-to-end.
    pub async fn handle(&self, req: Request<Incoming>, peer_ip: IpAddr) -> Response<Full<Bytes>> {
        let start = std::time::Instant::now();

        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query_string = req.uri().query().map(|q| q.to_string());
        let host = req
            .headers()
            .get("host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let decision = self
            .interceptor
            .intercept(req.headers(), Some(peer_ip), &path)
            .await;

        let (response, action, client_ip, country) = match decision {
            Decision::Deny { ip } => {
                info!(client_ip = %ip, path = %path, "Request denied");
                (access_denied(), "denied", ip, None)
            }
            Decision::Allow { record } => {
                debug!(
                    client_ip = %record.ip,
                    method = %method,
                    path = %path,
                    "Forwarding request upstream"
                );

                let headers: HashMap<String, String> = req
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                    .collect();

                let body_bytes = match req.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) => {
                        warn!("Failed to read request body: {}", err);
                        Bytes::new()
                    }
                };

                let response = self
                    .forward_to_upstream(
                        &method,
                        &path,
                        query_string.as_deref(),
                        &host,
                        &headers,
                        body_bytes,
                        record.ip,
                    )
                    .await;

                (response, "allowed", record.ip, record.country)
            }
        };

        if let Some(ref logger) = self.access_log {
            logger.log(
                client_ip,
                &method,
                &path,
                &host,
                response.status().as_u16(),
                action,
                start.elapsed().as_micros() as u64,
                country.as_deref(),
            );
        }

        response
    }

    /// Forward the request to the configured upstream over the pooled client.
    #[allow(clippy::too_many_arguments)]
    async fn forward_to_upstream(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        host: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
        client_ip: IpAddr,
    ) -> Response<Full<Bytes>> {
        let uri = match query {
            Some(q) => format!("http://{}{}?{}", self.upstream_addr, path, q),
            None => format!("http://{}{}", self.upstream_addr, path),
        };

        let parsed_method = match hyper::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                warn!("Invalid HTTP method: {}", method);
                return bad_gateway();
            }
        };

        let mut builder = Request::builder().method(parsed_method).uri(&uri);
        builder = builder.header("Host", host);
        builder = builder.header("X-Forwarded-For", client_ip.to_string());
        builder = builder.header("X-Real-IP", client_ip.to_string());

        for (name, value) in headers {
            if !should_forward_header(name) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        let upstream_req = match builder.body(Full::new(body)) {
            Ok(r) => r,
            Err(err) => {
                error!("Failed to build upstream request: {}", err);
                return bad_gateway();
            }
        };

        let upstream_resp = match self.upstream_client.request(upstream_req).await {
            Ok(r) => r,
            Err(err) => {
                error!(upstream = %self.upstream_addr, error = %err, "Upstream request failed");
                return bad_gateway();
            }
        };

        let (parts, incoming_body) = upstream_resp.into_parts();
        let body_bytes = match incoming_body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                error!("Failed to read upstream response body: {}", err);
                return bad_gateway();
            }
        };

        Response::from_parts(parts, Full::new(body_bytes))
    }
}

fn should_forward_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    !SKIP_HEADERS.contains(&lower.as_str())
}

/// Return the `403 Forbidden` response served to blocked clients.
pub fn access_denied() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(DENIED_BODY)))
        .unwrap()
}

/// Return a `502 Bad Gateway` response.
pub fn bad_gateway() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from("502 Bad Gateway: upstream unavailable")))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denied_response_has_fixed_status_and_body() {
        let resp = access_denied();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "Access denied. Your IP address has been blocked.");
    }

    #[test]
    fn hop_by_hop_and_proxy_headers_are_not_forwarded() {
        assert!(!should_forward_header("Host"));
        assert!(!should_forward_header("Connection"));
        assert!(!should_forward_header("X-Forwarded-For"));
        assert!(!should_forward_header("transfer-encoding"));

        assert!(should_forward_header("Accept"));
        assert!(should_forward_header("User-Agent"));
        assert!(should_forward_header("Cookie"));
    }

    #[test]
    fn bad_gateway_is_502() {
        assert_eq!(bad_gateway().status(), StatusCode::BAD_GATEWAY);
    }
}
