//! Response filter hook.
//!
//! The target's handshake response passes through exactly one
//! [`ResponseFilter`] before it reaches the client. Whatever the filter
//! returns is what the client sees.

use std::sync::Arc;

use http::Method;
use tracing::Span;

use crate::http::HandshakeResponse;
use crate::net::{TunnelId, PLAIN_PORT, TLS_PORT};

/// Which entry path a tunnel came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Plain,
    Tls,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Plain => "plain",
            Variant::Tls => "tls",
        }
    }

    /// Port assumed when the request names none.
    pub fn default_port(&self) -> u16 {
        match self {
            Variant::Plain => PLAIN_PORT,
            Variant::Tls => TLS_PORT,
        }
    }
}

/// Per-tunnel context handed to the filter.
#[derive(Debug, Clone)]
pub struct ProxyCtx {
    pub id: TunnelId,
    pub variant: Variant,
    /// `host:port` the tunnel dialed.
    pub target: String,
    pub method: Method,
    /// Request target as the client wrote it.
    pub request_target: String,
    /// The tunnel's span; filters may enter it or record into it.
    pub span: Span,
}

/// Inspects and optionally rewrites a handshake response.
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, response: HandshakeResponse, ctx: &ProxyCtx) -> HandshakeResponse;
}

impl<F> ResponseFilter for F
where
    F: Fn(HandshakeResponse, &ProxyCtx) -> HandshakeResponse + Send + Sync,
{
    fn filter(&self, response: HandshakeResponse, ctx: &ProxyCtx) -> HandshakeResponse {
        self(response, ctx)
    }
}

/// Forwards the response untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ResponseFilter for PassThrough {
    fn filter(&self, response: HandshakeResponse, _ctx: &ProxyCtx) -> HandshakeResponse {
        response
    }
}

/// Filters applied in order, each seeing the previous one's output.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn ResponseFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl ResponseFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl ResponseFilter for FilterChain {
    fn filter(&self, response: HandshakeResponse, ctx: &ProxyCtx) -> HandshakeResponse {
        self.filters
            .iter()
            .fold(response, |response, filter| filter.filter(response, ctx))
    }
}

#[cfg(test)]
pub(crate) fn test_ctx() -> ProxyCtx {
    ProxyCtx {
        id: TunnelId::new(),
        variant: Variant::Plain,
        target: "example.com:80".into(),
        method: Method::GET,
        request_target: "/chat".into(),
        span: Span::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn variant_ports() {
        assert_eq!(Variant::Plain.default_port(), 80);
        assert_eq!(Variant::Tls.default_port(), 443);
        assert_eq!(Variant::Tls.as_str(), "tls");
    }

    #[test]
    fn pass_through_is_identity() {
        let mut response = HandshakeResponse::new(StatusCode::SWITCHING_PROTOCOLS);
        response.append_header("Upgrade", "websocket");

        let out = PassThrough.filter(response.clone(), &test_ctx());
        assert_eq!(out, response);
    }

    #[test]
    fn closures_are_filters() {
        let tag = |mut response: HandshakeResponse, ctx: &ProxyCtx| {
            response.append_header("X-Tunnel", ctx.variant.as_str());
            response
        };

        let out = tag.filter(HandshakeResponse::new(StatusCode::OK), &test_ctx());
        assert_eq!(out.header("x-tunnel"), Some(&b"plain"[..]));
    }

    #[test]
    fn chain_applies_in_order() {
        let chain = FilterChain::new()
            .with(|mut r: HandshakeResponse, _: &ProxyCtx| {
                r.set_header("X-Step", "one");
                r
            })
            .with(|mut r: HandshakeResponse, _: &ProxyCtx| {
                let seen = r.header("x-step").map(<[u8]>::to_vec).unwrap_or_default();
                r.set_header("X-Step", [seen, b"+two".to_vec()].concat());
                r
            });

        assert_eq!(chain.len(), 2);
        let out = chain.filter(HandshakeResponse::new(StatusCode::OK), &test_ctx());
        assert_eq!(out.header("x-step"), Some(&b"one+two"[..]));
    }

    #[test]
    fn empty_chain_passes_through() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        let response = HandshakeResponse::new(StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(chain.filter(response.clone(), &test_ctx()), response);
    }
}
