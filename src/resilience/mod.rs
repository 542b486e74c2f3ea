//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnel setup:
//!     → timeouts.rs (deadline on dialing the target)
//!     → timeouts.rs (deadline on the handshake relay)
//! ```
//!
//! # Design Decisions
//! - Every setup stage that waits on a peer has a deadline
//! - No retries: a failed tunnel is reported, never re-attempted

pub mod timeouts;
