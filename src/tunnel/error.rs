//! Tunnel error definitions.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::http::CodecError;
use crate::net::HijackError;
use crate::resilience::timeouts::TimeoutStage;

/// Why a tunnel never reached, or fell out of, the handshake phase.
///
/// Every variant is local to one tunnel; nothing here is retried.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The request is not a websocket upgrade.
    #[error("not a websocket upgrade request")]
    NotUpgrade,

    /// Neither the request target nor `Host` names a target.
    #[error("upgrade request names no target host")]
    MissingHost,

    /// A TLS tunnel was requested but no TLS client configuration is installed.
    #[error("no upstream TLS configuration installed")]
    TlsUnavailable,

    /// Target unreachable or TLS negotiation failed.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The client connection could not be taken over.
    #[error("failed to take over client connection: {0}")]
    Hijack(#[from] HijackError),

    #[error("failed to write upgrade request to target: {0}")]
    HandshakeWrite(#[source] io::Error),

    #[error("failed to read handshake response from target: {0}")]
    HandshakeRead(#[source] CodecError),

    #[error("failed to write handshake response to client: {0}")]
    ResponseWrite(#[source] io::Error),

    /// A setup stage exceeded its deadline.
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout { stage: TimeoutStage, after: Duration },
}

impl TunnelError {
    /// Short label used as the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            TunnelError::NotUpgrade => "not_upgrade",
            TunnelError::MissingHost => "missing_host",
            TunnelError::TlsUnavailable => "tls_unavailable",
            TunnelError::Dial { .. } => "dial_failed",
            TunnelError::Hijack(_) => "hijack_failed",
            TunnelError::HandshakeWrite(_)
            | TunnelError::HandshakeRead(_)
            | TunnelError::ResponseWrite(_) => "handshake_failed",
            TunnelError::Timeout { .. } => "timeout",
        }
    }
}
