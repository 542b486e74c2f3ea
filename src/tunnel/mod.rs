//! Upgrade tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request + client connection
//!     → http::upgrade (is this a websocket upgrade at all?)
//!     → net::dial (plain TCP or TLS to the target)
//!     → net::hijack (plaintext only: take over the raw client socket)
//!     → handshake.rs (forward request, filter response, answer client)
//!     → duplex.rs (raw bytes both ways until either side stops)
//! ```
//!
//! # Design Decisions
//! - The target is dialed before the client is touched, in both variants;
//!   a failed dial writes nothing anywhere
//! - Every failure is local to one tunnel and is never retried
//! - Connect and handshake deadlines are reported as timeouts, distinct
//!   from I/O errors

pub mod duplex;
pub mod error;
pub mod filter;
pub mod handshake;
pub mod session;

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{Instrument, Span};

use crate::config::{TimeoutConfig, TunnelConfig};
use crate::http::{is_upgrade_request, CodecLimits, UpgradeRequest};
use crate::net::tls::{build_client_config, TlsSetupError};
use crate::net::{target_address, Dial, Hijack, TcpDialer, TlsDialer, TunnelTracker};
use crate::observability::{metrics, spans};
use crate::resilience::timeouts::{with_deadline, TimeoutStage};

pub use duplex::{Direction, DuplexReport, TunnelEnd};
pub use error::TunnelError;
pub use filter::{FilterChain, PassThrough, ProxyCtx, ResponseFilter, Variant};
pub use session::{TunnelSession, TunnelState};

/// Tunnels websocket upgrades to their targets.
///
/// One `Tunnel` serves any number of connections concurrently; it holds
/// no per-connection state. `D` opens plaintext targets; swap it with
/// [`Tunnel::with_dialer`] to route through an upstream proxy or a custom
/// transport.
#[derive(Clone)]
pub struct Tunnel<D = TcpDialer> {
    dialer: D,
    filter: Arc<dyn ResponseFilter>,
    tls: Option<TlsDialer>,
    timeouts: TimeoutConfig,
    limits: CodecLimits,
    tracker: TunnelTracker,
}

impl<D> std::fmt::Debug for Tunnel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("tls", &self.tls.is_some())
            .field("timeouts", &self.timeouts)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Tunnel {
    /// A plaintext-only tunnel with default timeouts and limits.
    pub fn new(filter: impl ResponseFilter + 'static) -> Self {
        Self {
            dialer: TcpDialer,
            filter: Arc::new(filter),
            tls: None,
            timeouts: TimeoutConfig::default(),
            limits: CodecLimits::default(),
            tracker: TunnelTracker::new(),
        }
    }

    /// A tunnel configured from `config`, able to dial TLS targets.
    pub fn from_config(
        config: &TunnelConfig,
        filter: impl ResponseFilter + 'static,
    ) -> Result<Self, TlsSetupError> {
        let client_config = build_client_config(&config.upstream_tls)?;
        Ok(Self::new(filter)
            .with_tls_config(client_config)
            .with_timeouts(config.timeouts.clone())
            .with_limits(CodecLimits::from(&config.limits)))
    }
}

impl<D: Dial> Tunnel<D> {
    /// Dial plaintext targets with `dialer` instead.
    pub fn with_dialer<E: Dial>(self, dialer: E) -> Tunnel<E> {
        Tunnel {
            dialer,
            filter: self.filter,
            tls: self.tls,
            timeouts: self.timeouts,
            limits: self.limits,
            tracker: self.tracker,
        }
    }

    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(TlsDialer::new(config));
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Share a tracker with the caller, e.g. to drain tunnels on shutdown.
    pub fn with_tracker(mut self, tracker: TunnelTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &TunnelTracker {
        &self.tracker
    }

    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Tunnel a plaintext upgrade.
    ///
    /// The target is dialed first; only then is `client` hijacked. On a dial
    /// failure `client` is dropped without a byte written to it.
    pub async fn serve_plain<H>(
        &self,
        request: UpgradeRequest,
        client: H,
    ) -> Result<DuplexReport, TunnelError>
    where
        H: Hijack + Send,
    {
        self.serve(Variant::Plain, request, &self.dialer, move || {
            Ok(client.hijack()?.into_io())
        })
        .await
    }

    /// Tunnel an upgrade that arrived over the proxy's own TLS session.
    ///
    /// `client` is the decrypted client channel, used as is.
    pub async fn serve_tls<C>(
        &self,
        request: UpgradeRequest,
        client: C,
    ) -> Result<DuplexReport, TunnelError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match &self.tls {
            Some(dialer) => self.serve(Variant::Tls, request, dialer, move || Ok(client)).await,
            None => {
                let err = TunnelError::TlsUnavailable;
                tracing::error!(error = %err, "Cannot tunnel TLS upgrade");
                metrics::record_tunnel(Variant::Tls.as_str(), err.outcome());
                Err(err)
            }
        }
    }

    async fn serve<X, C, F>(
        &self,
        variant: Variant,
        request: UpgradeRequest,
        dialer: &X,
        acquire_client: F,
    ) -> Result<DuplexReport, TunnelError>
    where
        X: Dial,
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce() -> Result<C, TunnelError> + Send,
    {
        let mut session = TunnelSession::new(self.tracker.track());
        let target = request
            .authority()
            .map(|authority| target_address(&authority, variant.default_port()));
        let span = spans::tunnel_span(session.id(), variant.as_str(), target.as_deref().unwrap_or("-"));

        let result = self
            .drive(&mut session, variant, &request, target, dialer, acquire_client, span.clone())
            .instrument(span.clone())
            .await;
        session.close();

        let outcome = match &result {
            Ok(report) => report.end.as_str(),
            Err(err) => {
                span.in_scope(|| {
                    tracing::error!(error = %err, outcome = err.outcome(), "Tunnel aborted")
                });
                err.outcome()
            }
        };
        metrics::record_tunnel(variant.as_str(), outcome);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive<X, C, F>(
        &self,
        session: &mut TunnelSession,
        variant: Variant,
        request: &UpgradeRequest,
        target: Option<String>,
        dialer: &X,
        acquire_client: F,
        span: Span,
    ) -> Result<DuplexReport, TunnelError>
    where
        X: Dial,
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce() -> Result<C, TunnelError> + Send,
    {
        if !is_upgrade_request(request.headers()) {
            return Err(TunnelError::NotUpgrade);
        }
        let addr = target.ok_or(TunnelError::MissingHost)?;
        session.advance(TunnelState::Establishing);

        let started = Instant::now();
        let conn = with_deadline(TimeoutStage::Connect, self.timeouts.connect(), async {
            dialer.dial(&addr).await.map_err(|source| TunnelError::Dial {
                addr: addr.clone(),
                source,
            })
        })
        .await?;
        tracing::debug!("Target connected");

        let mut client = acquire_client()?;
        session.advance(TunnelState::Handshaking);

        let ctx = ProxyCtx {
            id: session.id(),
            variant,
            target: addr,
            method: request.method().clone(),
            request_target: request.target().to_string(),
            span,
        };
        let mut target = BufReader::new(conn);
        with_deadline(
            TimeoutStage::Handshake,
            self.timeouts.handshake(),
            handshake::relay(
                &ctx,
                request,
                &mut target,
                &mut client,
                self.filter.as_ref(),
                &self.limits,
            ),
        )
        .await?;
        metrics::record_handshake(variant.as_str(), started);

        session.advance(TunnelState::Tunneling);
        Ok(duplex::run(client, target, self.timeouts.idle()).await)
    }
}
