//! Shutdown coordination for the relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Combines a draining flag that new connections check before doing any work
/// with a broadcast channel that long-running tasks can await. Clones share
/// the same state.
#[derive(Debug, Clone)]
pub struct Shutdown {
    draining: Arc<AtomicBool>,
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            draining: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Set the draining flag and wake every subscriber.
    pub fn trigger(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown triggered");
        }
        let _ = self.tx.send(());
    }

    /// True once [`trigger`](Self::trigger) has been called.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered, including before this call.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_draining() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
