//! Dialing the upgrade target.
//!
//! # Responsibilities
//! - Resolve the target address from the request (authority or `Host`)
//! - Open a plaintext TCP connection, or TCP + TLS for `wss`
//!
//! # Design Decisions
//! - One dial per upgrade; no retry, no pooling, no fallback strategy
//! - SNI and certificate verification use the host part of the address

use std::future::Future;
use std::io;
use std::sync::Arc;

use http::uri::Authority;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Default port for plaintext `ws`/`http` targets.
pub const PLAIN_PORT: u16 = 80;
/// Default port for `wss`/`https` targets.
pub const TLS_PORT: u16 = 443;

/// Something that can open a duplex connection to `host:port`.
pub trait Dial: Send + Sync {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self, addr: &str) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

/// `host:port` for an authority, filling in `default_port`.
pub fn target_address(authority: &Authority, default_port: u16) -> String {
    let port = authority.port_u16().unwrap_or(default_port);
    format!("{}:{}", authority.host(), port)
}

/// Host part of a `host:port` address, without IPv6 brackets.
fn host_of(addr: &str) -> &str {
    let host = match addr.rfind(':') {
        Some(idx) if !addr[idx..].contains(']') => &addr[..idx],
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dial for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// TCP + TLS dialer using the proxy's TLS client configuration.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
}

impl TlsDialer {
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
        }
    }
}

impl std::fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDialer").finish_non_exhaustive()
    }
}

impl Dial for TlsDialer {
    type Conn = TlsStream<TcpStream>;

    async fn dial(&self, addr: &str) -> io::Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host_of(addr).to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let stream = TcpDialer.dial(addr).await?;
        self.connector.connect(server_name, stream).await
    }
}
