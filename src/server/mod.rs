mod admin;
pub mod bootstrap;
pub mod runtime;
mod state;

pub use state::GatewayState;

use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long either listener waits for in-flight connections after shutdown.
const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Run the downstream proxy server with graceful shutdown support.
///
/// When `shutdown` is cancelled the server stops accepting new connections
/// and waits up to `DRAIN_TIMEOUT` for in-flight requests and tunnels to
/// complete before forcibly dropping them.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);

    // Atomic counter for reading active connection count (metrics crate gauges are write-only).
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.cancelled() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!(
                    "gateway_connections_total",
                    "status" => "accepted",
                )
                .increment(1);
                v
            }
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                metrics::counter!(
                    "gateway_connections_total",
                    "status" => "error",
                )
                .increment(1);
                continue;
            }
        };

        metrics::gauge!("gateway_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move { proxy::handle_request(req, state, peer_addr).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(std::time::Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            metrics::gauge!("gateway_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain_connections("proxy", &active_conns).await;
    Ok(())
}

/// Run the admin server: pool CRUD plus health and metrics. Stops
/// accepting and drains on shutdown exactly like the proxy listener.
pub async fn run_admin_server(
    listen: &str,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.cancelled() => {
                info!("server: admin: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, _) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: admin: accept failed, error={}", e);
                continue;
            }
        };

        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }

            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    drain_connections("admin", &active_conns).await;
    Ok(())
}

/// Wait until `active_conns` hits zero, capped at `DRAIN_TIMEOUT`.
async fn drain_connections(name: &str, active_conns: &AtomicI64) {
    let active = active_conns.load(Ordering::Relaxed);
    if active == 0 {
        return;
    }

    info!(
        "server: {}: waiting for {} active connections to drain",
        name, active
    );
    let drain = async {
        loop {
            if active_conns.load(Ordering::Relaxed) == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
        Ok(_) => info!("server: {}: all connections drained", name),
        Err(_) => {
            let remaining = active_conns.load(Ordering::Relaxed);
            info!(
                "server: {}: drain timeout ({}s), {} connections still active",
                name,
                DRAIN_TIMEOUT.as_secs(),
                remaining
            );
        }
    }
}
