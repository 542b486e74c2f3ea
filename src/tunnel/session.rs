//! Per-tunnel state machine.
//!
//! # States
//! - Detecting: the request is being checked for an upgrade
//! - Establishing: dialing the target and taking over the client
//! - Handshaking: relaying the HTTP upgrade exchange
//! - Tunneling: copying raw bytes both ways
//! - Closed: terminal
//!
//! # State Transitions
//! ```text
//! Detecting → Establishing → Handshaking → Tunneling → Closed
//! Detecting, Establishing, Handshaking → Closed on failure
//! ```
//!
//! # Design Decisions
//! - No recovery edges: a failed tunnel is never retried
//! - The session owns the tracker guard, so a tunnel counts as live
//!   exactly as long as its session exists

use crate::net::{TunnelGuard, TunnelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Detecting,
    Establishing,
    Handshaking,
    Tunneling,
    Closed,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Detecting => "detecting",
            TunnelState::Establishing => "establishing",
            TunnelState::Handshaking => "handshaking",
            TunnelState::Tunneling => "tunneling",
            TunnelState::Closed => "closed",
        }
    }

    pub fn can_advance_to(&self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (*self, next),
            (Detecting, Establishing)
                | (Establishing, Handshaking)
                | (Handshaking, Tunneling)
                | (Detecting | Establishing | Handshaking | Tunneling, Closed)
        )
    }
}

/// One tunnel's lifetime record.
#[derive(Debug)]
pub struct TunnelSession {
    state: TunnelState,
    guard: TunnelGuard,
}

impl TunnelSession {
    pub fn new(guard: TunnelGuard) -> Self {
        Self {
            state: TunnelState::Detecting,
            guard,
        }
    }

    pub fn id(&self) -> TunnelId {
        self.guard.id()
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Move to `next`. Illegal edges are refused and leave the state as is.
    pub fn advance(&mut self, next: TunnelState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                from = self.state.as_str(),
                to = next.as_str(),
                "Refused illegal tunnel state transition"
            );
            return false;
        }
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "Tunnel state");
        self.state = next;
        true
    }

    /// Close from whatever state the session is in. Idempotent.
    pub fn close(&mut self) {
        if self.state != TunnelState::Closed {
            self.advance(TunnelState::Closed);
        }
    }
}
