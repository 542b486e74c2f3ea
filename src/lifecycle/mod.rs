//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT / SIGTERM → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loops stop → live tunnels drain → exit
//! ```
//!
//! # Design Decisions
//! - Tunnels already running are not interrupted by shutdown; the binary
//!   waits for them up to a deadline
//! - A dropped coordinator counts as a shutdown request

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::wait_for_signal;
