//! Shared fixtures for the integration tests: fake targets and a minimal
//! proxy front end around `Tunnel`.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use upgrade_tunnel::http::CodecLimits;
use upgrade_tunnel::tunnel::{DuplexReport, Tunnel, TunnelError};
use upgrade_tunnel::ClientConn;

pub const SWITCHING: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

/// A websocket upgrade request for `host`, with mixed header casing.
pub fn upgrade_request(host: &str) -> Vec<u8> {
    format!(
        "GET /chat?room=1 HTTP/1.1\r\n\
         Host: {host}\r\n\
         connection: keep-alive, Upgrade\r\n\
         UPGRADE: WebSocket\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

/// A target that answers every connection with a fixed reply.
pub struct RawTarget {
    pub addr: SocketAddr,
    /// The request head each connection received, in arrival order.
    pub heads: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Read a message head up to and including the blank line, nothing more.
pub async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut head = Vec::new();
    loop {
        let n = reader.read_until(b'\n', &mut head).await.unwrap();
        if n == 0 || head.ends_with(b"\r\n\r\n") {
            return head;
        }
    }
}

async fn serve_raw<S>(stream: S, reply: &'static [u8], echo: bool, heads: mpsc::UnboundedSender<Vec<u8>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let head = read_head(&mut reader).await;
    let _ = heads.send(head);

    if reader.get_mut().write_all(reply).await.is_err() {
        return;
    }
    let _ = reader.get_mut().flush().await;
    if !echo {
        let _ = reader.get_mut().shutdown().await;
        return;
    }

    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if reader.get_mut().write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Plain TCP target: records the head, sends `reply`, then echoes (or closes).
pub async fn start_raw_target(reply: &'static [u8], echo: bool) -> RawTarget {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, heads) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_raw(stream, reply, echo, tx.clone()));
        }
    });

    RawTarget { addr, heads }
}

/// Self-signed certificate for 127.0.0.1 and a root store trusting it.
pub fn self_signed() -> (Arc<ServerConfig>, RootCertStore) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let mut roots = RootCertStore::empty();
    roots.add(cert_der.clone()).unwrap();

    let server = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();

    (Arc::new(server), roots)
}

/// TLS target with the same behavior as [`start_raw_target`].
pub async fn start_tls_raw_target(reply: &'static [u8], echo: bool) -> (RawTarget, RootCertStore) {
    let (server, roots) = self_signed();
    let acceptor = TlsAcceptor::from(server);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, heads) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(stream).await {
                    serve_raw(stream, reply, echo, tx).await;
                }
            });
        }
    });

    (RawTarget { addr, heads }, roots)
}

/// A real websocket echo server.
pub async fn start_ws_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(message)) = source.next().await {
                    if (message.is_text() || message.is_binary()) && sink.send(message).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// A bound-then-released address nobody listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A front end that reads one request per connection and hands it to
/// `Tunnel::serve_plain`. Each tunnel's result is reported on the channel.
pub async fn start_proxy(
    tunnel: Tunnel,
) -> (SocketAddr, mpsc::UnboundedReceiver<Result<DuplexReport, TunnelError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tunnel = Arc::new(tunnel);
    let (tx, results) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tunnel = Arc::clone(&tunnel);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut conn = ClientConn::new(stream);
                let Ok(request) = conn.read_request(&CodecLimits::default()).await else {
                    return;
                };
                let _ = tx.send(tunnel.serve_plain(request, conn).await);
            });
        }
    });

    (addr, results)
}

pub async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.unwrap())
}
