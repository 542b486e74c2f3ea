//! Tunnel identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique tunnel IDs for tracing
//! - Count live tunnels so shutdown can drain them
//! - Keep the `tunnel_active` gauge in step with the count

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Global atomic counter for tunnel IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static TUNNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one tunnel (one upgraded client connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u64);

impl TunnelId {
    /// Generate a new unique tunnel ID.
    pub fn new() -> Self {
        Self(TUNNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tun-{}", self.0)
    }
}

/// Tracks live tunnels for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct TunnelTracker {
    active_count: Arc<AtomicU64>,
}

impl TunnelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live tunnel. Returns a guard that decrements on drop.
    pub fn track(&self) -> TunnelGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_tunnels(active);
        TunnelGuard {
            active_count: Arc::clone(&self.active_count),
            id: TunnelId::new(),
        }
    }

    /// Get current live tunnel count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tunnel has closed. Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Guard that tracks a tunnel's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct TunnelGuard {
    active_count: Arc<AtomicU64>,
    id: TunnelId,
}

impl TunnelGuard {
    pub fn id(&self) -> TunnelId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_tunnels(active);
        tracing::trace!(tunnel_id = %self.id, "Tunnel released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_id_unique() {
        let id1 = TunnelId::new();
        let id2 = TunnelId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("tun-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = TunnelTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_times_out_while_busy() {
        let tracker = TunnelTracker::new();
        let guard = tracker.track();
        assert!(!tracker.wait_idle(Duration::from_millis(150)).await);
        drop(guard);
        assert!(tracker.wait_idle(Duration::from_millis(500)).await);
    }
}
