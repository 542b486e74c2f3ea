//! Handshake relay.
//!
//! # Responsibilities
//! - Forward the client's upgrade request to the target
//! - Read exactly one response back, leaving later bytes in the reader
//! - Run the response filter once and write its output to the client
//!
//! # Design Decisions
//! - Strictly sequential: each step completes before the next begins
//! - Any failure aborts; nothing partial is written to the client
//! - A non-101 answer is still forwarded; the caller keeps relaying bytes

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::http::{CodecLimits, HandshakeResponse, UpgradeRequest};

use super::error::TunnelError;
use super::filter::{ProxyCtx, ResponseFilter};

/// Relay the HTTP upgrade exchange between `client` and `target`.
///
/// `target` stays buffered so that bytes the target sent right after its
/// response head are handed to the tunnel, not lost.
pub async fn relay<T, C>(
    ctx: &ProxyCtx,
    request: &UpgradeRequest,
    target: &mut BufReader<T>,
    client: &mut C,
    filter: &dyn ResponseFilter,
    limits: &CodecLimits,
) -> Result<StatusCode, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: AsyncWrite + Unpin,
{
    request
        .write_to(target.get_mut())
        .await
        .map_err(TunnelError::HandshakeWrite)?;

    let response = HandshakeResponse::read_from(target, request.method(), limits)
        .await
        .map_err(TunnelError::HandshakeRead)?;
    let upstream_status = response.status();

    let response = filter.filter(response, ctx);
    let status = response.status();

    response
        .write_to(client)
        .await
        .map_err(TunnelError::ResponseWrite)?;

    if status == StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(upstream_status = upstream_status.as_u16(), "Handshake relayed");
    } else {
        tracing::warn!(
            upstream_status = upstream_status.as_u16(),
            status = status.as_u16(),
            "Target did not switch protocols"
        );
    }

    Ok(status)
}
