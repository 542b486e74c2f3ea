//! Shutdown coordination.

use tokio::sync::broadcast;

/// Fans a single shutdown request out to every accept loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// A handle that resolves once shutdown is requested.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            fired: false,
        }
    }

    /// Request shutdown. Later subscribers do not see earlier triggers.
    pub fn trigger(&self) {
        let notified = self.tx.send(()).unwrap_or(0);
        tracing::info!(listeners = notified, "Shutdown requested");
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    fired: bool,
}

impl ShutdownSignal {
    /// Wait for shutdown. Returns immediately once it has fired.
    pub async fn recv(&mut self) {
        if self.fired {
            return;
        }
        // Lagged or Closed both mean the coordinator wants us gone.
        let _ = self.rx.recv().await;
        self.fired = true;
    }

    pub fn is_shutdown(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), a.recv()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.recv()).await.unwrap();
        assert!(a.is_shutdown());

        // Stays fired.
        tokio::time::timeout(Duration::from_millis(50), a.recv()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_coordinator_counts_as_shutdown() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.recv()).await.unwrap();
    }

    #[tokio::test]
    async fn no_trigger_keeps_waiting() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        assert!(tokio::time::timeout(Duration::from_millis(50), signal.recv())
            .await
            .is_err());
        assert!(!signal.is_shutdown());
    }
}
