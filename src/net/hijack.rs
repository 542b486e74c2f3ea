//! Raw takeover of an inbound client connection.
//!
//! # Responsibilities
//! - Express "this transport can hand over its raw socket" as a trait, so
//!   the plaintext tunnel only accepts transports that can
//! - Carry over bytes the HTTP layer buffered past the request
//! - Provide `ClientConn`, the raw inbound connection the listener owns
//!
//! # Design Decisions
//! - Capability is static (`H: Hijack`), not a runtime downcast
//! - Hijacking after a response went out is refused: the client would see
//!   two answers on one request

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};

use crate::http::{CodecError, CodecLimits, HandshakeResponse, UpgradeRequest};

/// Errors raised when taking over a client connection.
#[derive(Debug, Error)]
pub enum HijackError {
    #[error("connection already answered through normal response handling")]
    AlreadyResponded,
}

/// A raw client connection detached from request/response handling.
#[derive(Debug)]
pub struct Hijacked<S> {
    pub conn: S,
    /// Bytes already read from `conn` but not consumed by the request parser.
    pub buffered: Bytes,
}

impl<S> Hijacked<S> {
    /// A stream that yields `buffered` before reading from `conn`.
    pub fn into_io(self) -> PrefixedIo<S> {
        PrefixedIo::new(self.buffered, self.conn)
    }
}

/// Transports that can give up their raw duplex stream.
pub trait Hijack: Sized {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn hijack(self) -> Result<Hijacked<Self::Io>, HijackError>;
}

/// An inbound client connection in its HTTP phase.
#[derive(Debug)]
pub struct ClientConn<S> {
    reader: BufReader<S>,
    peer: Option<SocketAddr>,
    responded: bool,
}

impl<S> ClientConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            peer: None,
            responded: false,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Read the next request from the client.
    pub async fn read_request(&mut self, limits: &CodecLimits) -> Result<UpgradeRequest, CodecError> {
        UpgradeRequest::read_from(&mut self.reader, limits).await
    }

    /// Answer through normal response handling. Rules out a later hijack.
    pub async fn respond(&mut self, response: &HandshakeResponse) -> io::Result<()> {
        self.responded = true;
        response.write_to(self.reader.get_mut()).await
    }
}

impl<S> Hijack for ClientConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = S;

    fn hijack(self) -> Result<Hijacked<S>, HijackError> {
        if self.responded {
            return Err(HijackError::AlreadyResponded);
        }
        let buffered = Bytes::copy_from_slice(self.reader.buffer());
        Ok(Hijacked {
            conn: self.reader.into_inner(),
            buffered,
        })
    }
}

/// A duplex stream with a replayed read prefix.
#[derive(Debug)]
pub struct PrefixedIo<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedIo<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedIo<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
