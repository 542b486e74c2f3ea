//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound target dialing and the handshake relay by configured deadlines
//! - Report expiry as a timeout, never as a generic I/O failure
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the wrapped future is dropped on
//!   expiry, which closes whatever connection it owned
//! - `None` means no deadline for that stage

use std::future::Future;
use std::time::Duration;

use crate::tunnel::TunnelError;

/// Which part of tunnel setup ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Connect,
    Handshake,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutStage::Connect => write!(f, "connect"),
            TimeoutStage::Handshake => write!(f, "handshake"),
        }
    }
}

/// Run `fut` under an optional deadline.
pub async fn with_deadline<F, T>(
    stage: TimeoutStage,
    limit: Option<Duration>,
    fut: F,
) -> Result<T, TunnelError>
where
    F: Future<Output = Result<T, TunnelError>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| TunnelError::Timeout { stage, after })?,
        None => fut.await,
    }
}
