//! WebSocket upgrade tunnel for an intercepting HTTP(S) proxy.
//!
//! Recognizes websocket upgrade requests, dials the real target (plain or
//! TLS), relays the opening handshake through a response filter, then
//! turns into a transparent byte tunnel for the rest of the connection.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod tunnel;

pub use config::TunnelConfig;
pub use http::{is_upgrade_request, HandshakeResponse, UpgradeRequest};
pub use lifecycle::Shutdown;
pub use net::ClientConn;
pub use tunnel::{DuplexReport, ProxyCtx, ResponseFilter, Tunnel, TunnelEnd, TunnelError};
