use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::Request;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::settings::Settings;

use super::http_handler::HttpHandler;

/// Front HTTP server: accepts client connections, enforces the connection
/// cap, and hands each request to the [`HttpHandler`].
pub struct ProxyServer {
    settings: Arc<Settings>,
    handler: Arc<HttpHandler>,
    active: Arc<AtomicU64>,
}

impl ProxyServer {
    pub fn new(settings: Arc<Settings>, handler: Arc<HttpHandler>) -> Self {
        Self {
            settings,
            handler,
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the accept loop forever.
    pub async fn run(&self) -> Result<()> {
        let addr = &self.settings.server.bind_http;
        let listener = bind_tcp_listener(addr)?;
        let listener = TcpListener::from_std(listener)
            .with_context(|| format!("failed to register listener on {addr}"))?;
        info!(addr = %addr, "HTTP listener started");

        let max_connections = self.settings.server.max_connections as u64;

        info!("Vigil front server is ready to accept connections");

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("Failed to accept TCP connection: {}", err);
                    continue;
                }
            };

            let peer_ip = peer_addr.ip();

            if self.active.load(Ordering::Relaxed) >= max_connections {
                debug!(client_ip = %peer_ip, "Max connections reached, dropping");
                drop(stream);
                continue;
            }

            self.active.fetch_add(1, Ordering::Relaxed);
            let guard = ConnectionGuard {
                active: Arc::clone(&self.active),
            };

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(err) = handle_connection(stream, handler, peer_ip).await {
                    debug!(
                        client_ip = %peer_ip,
                        error = %err,
                        "HTTP connection ended with error"
                    );
                }
            });
        }
    }
}

/// Bind a TCP listener with `SO_REUSEADDR` (and `SO_REUSEPORT` on unix) so
/// restarts do not trip over sockets in TIME_WAIT.
fn bind_tcp_listener(addr: &str) -> Result<std::net::TcpListener> {
    let sock_addr: std::net::SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address: {addr}"))?;

    let domain = if sock_addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    {
        socket.set_reuse_port(true)?;
    }

    socket.set_nonblocking(true)?;
    socket
        .bind(&sock_addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket.listen(8192)?;

    Ok(socket.into())
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<HttpHandler>,
    peer_ip: IpAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;

    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let h = Arc::clone(&handler);
        async move {
            let resp = h.handle(req, peer_ip).await;
            Ok::<_, hyper::Error>(resp)
        }
    });

    http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await?;

    Ok(())
}

struct ConnectionGuard {
    active: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
