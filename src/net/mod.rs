//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → hijack.rs (ClientConn: HTTP phase, then raw takeover)
//!
//! Outgoing target connection
//!     → dial.rs (TCP, or TCP + TLS with tls.rs client config)
//!
//! Both ends
//!     → connection.rs (tunnel ids, live tunnel tracking)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Every tunnel is tracked for graceful shutdown
//! - Dialing and hijacking are traits so the tunnel can be driven by any
//!   transport that offers the capability

pub mod connection;
pub mod dial;
pub mod hijack;
pub mod listener;
pub mod tls;

pub use connection::{TunnelGuard, TunnelId, TunnelTracker};
pub use dial::{target_address, Dial, TcpDialer, TlsDialer, PLAIN_PORT, TLS_PORT};
pub use hijack::{ClientConn, Hijack, HijackError, Hijacked, PrefixedIo};
pub use listener::{ConnectionPermit, Listener, ListenerError};
