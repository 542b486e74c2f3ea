//! WebSocket upgrade tunnel (demo proxy)
//!
//! Plays the outer proxy around the tunnel core: accepts connections,
//! reads one request each, tunnels websocket upgrades and answers anything
//! else with `501 Not Implemented`.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──TCP──▶ listener ──▶ ClientConn ──▶ upgrade? ──no──▶ 501
//!                                                    │
//!                                                   yes
//!                                                    ▼
//!                                        Tunnel::serve_plain ──TCP──▶ Target
//!
//!     Client ──TLS──▶ tls listener ──▶ ClientConn ──▶ hijack ──▶ Tunnel::serve_tls ──TLS──▶ Target
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use upgrade_tunnel::config::validation::validate_config;
use upgrade_tunnel::config::{load_config, ConfigError, TunnelConfig};
use upgrade_tunnel::http::{is_upgrade_request, CodecError, HandshakeResponse, UpgradeRequest};
use upgrade_tunnel::lifecycle::{wait_for_signal, Shutdown, ShutdownSignal};
use upgrade_tunnel::net::tls::load_server_config;
use upgrade_tunnel::net::{ClientConn, Hijack, Listener, ListenerError};
use upgrade_tunnel::observability::{logging, metrics};
use upgrade_tunnel::tunnel::{PassThrough, Tunnel};

/// How long shutdown waits for live tunnels.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "upgrade-tunnel")]
#[command(about = "Tunnels websocket upgrades to their targets", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TunnelConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("upgrade-tunnel v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls_listener = config.listener.tls.is_some(),
        max_connections = config.listener.max_connections,
        connect_secs = config.timeouts.connect_secs,
        handshake_secs = config.timeouts.handshake_secs,
        idle_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tunnel = Arc::new(Tunnel::from_config(&config, PassThrough)?);
    let shutdown = Shutdown::new();
    let mut listeners = JoinSet::new();

    let plain = Listener::bind("plain", &config.listener.bind_address, config.listener.max_connections).await?;
    listeners.spawn(accept_loop(plain, shutdown.subscribe(), {
        let tunnel = Arc::clone(&tunnel);
        move |stream, peer| handle_plain(Arc::clone(&tunnel), stream, peer)
    }));

    if let Some(tls) = &config.listener.tls {
        let acceptor = TlsAcceptor::from(load_server_config(
            Path::new(&tls.cert_path),
            Path::new(&tls.key_path),
        )?);
        let secure = Listener::bind("tls", &tls.bind_address, config.listener.max_connections).await?;
        listeners.spawn(accept_loop(secure, shutdown.subscribe(), {
            let tunnel = Arc::clone(&tunnel);
            move |stream, peer| handle_tls(Arc::clone(&tunnel), acceptor.clone(), stream, peer)
        }));
    }

    wait_for_signal().await?;
    shutdown.trigger();
    while listeners.join_next().await.is_some() {}

    let live = tunnel.tracker().active_count();
    if live > 0 {
        tracing::info!(live, "Draining tunnels");
        if !tunnel.tracker().wait_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(
                live = tunnel.tracker().active_count(),
                "Tunnels still open at shutdown deadline"
            );
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Accept until shutdown, running `handle` for each connection.
async fn accept_loop<F, Fut>(listener: Listener, mut shutdown: ShutdownSignal, handle: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let connection = handle(stream, peer);
                    tokio::spawn(async move {
                        connection.await;
                        drop(permit);
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            }
        }
    }
    tracing::info!(listener = listener.label(), "Listener stopped");
}

/// Disable Nagle on an accepted client socket; a failure is logged and ignored.
fn tune_client_socket(stream: &TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer_addr = %peer, error = %e, "Cannot set TCP_NODELAY");
    }
}

async fn handle_plain(tunnel: Arc<Tunnel>, stream: TcpStream, peer: SocketAddr) {
    tune_client_socket(&stream, peer);
    let mut conn = ClientConn::new(stream).with_peer(peer);
    let Some(request) = read_upgrade(&tunnel, &mut conn).await else {
        return;
    };
    // Errors are logged inside the tunnel span.
    let _ = tunnel.serve_plain(request, conn).await;
}

async fn handle_tls(tunnel: Arc<Tunnel>, acceptor: TlsAcceptor, stream: TcpStream, peer: SocketAddr) {
    tune_client_socket(&stream, peer);
    let stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(peer_addr = %peer, error = %e, "Client TLS handshake failed");
            return;
        }
    };

    let mut conn = ClientConn::new(stream).with_peer(peer);
    let Some(request) = read_upgrade(&tunnel, &mut conn).await else {
        return;
    };
    match conn.hijack() {
        Ok(hijacked) => {
            let _ = tunnel.serve_tls(request, hijacked.into_io()).await;
        }
        Err(e) => tracing::error!(peer_addr = %peer, error = %e, "Cannot take over TLS client"),
    }
}

/// Read one request; answer and drop anything that is not an upgrade.
async fn read_upgrade<S>(tunnel: &Tunnel, conn: &mut ClientConn<S>) -> Option<UpgradeRequest>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = conn.peer_addr();
    let limits = *tunnel.limits();
    let read = conn.read_request(&limits);
    let result = match tunnel.timeouts().handshake() {
        Some(limit) => {
            let Ok(result) = tokio::time::timeout(limit, read).await else {
                tracing::debug!(peer_addr = ?peer, "Client sent no request in time");
                return None;
            };
            result
        }
        None => read.await,
    };

    let request = match result {
        Ok(request) => request,
        Err(CodecError::ConnectionClosed) => return None,
        Err(e) => {
            tracing::debug!(peer_addr = ?peer, error = %e, "Unreadable request");
            let _ = conn.respond(&plain_response(StatusCode::BAD_REQUEST)).await;
            return None;
        }
    };

    if !is_upgrade_request(request.headers()) {
        tracing::debug!(
            peer_addr = ?peer,
            method = %request.method(),
            target = request.target(),
            "Not an upgrade request"
        );
        let _ = conn.respond(&plain_response(StatusCode::NOT_IMPLEMENTED)).await;
        return None;
    }
    Some(request)
}

fn plain_response(status: StatusCode) -> HandshakeResponse {
    let mut response = HandshakeResponse::new(status);
    response.append_header("Content-Length", "0");
    response.append_header("Connection", "close");
    response
}
