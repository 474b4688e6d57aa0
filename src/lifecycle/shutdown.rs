//! Cancellation coordination for in-flight calls.

use std::sync::Arc;

use tokio::sync::watch;

/// Coordinator for cancelling outstanding work.
///
/// Every [`trigger`](Self::trigger) starts a new epoch. Signals created before
/// the trigger report cancellation; signals created afterwards do not, so the
/// bridge can reconnect after a cleanup.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<u64>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the current epoch.
    pub fn subscribe(&self) -> ShutdownSignal {
        let rx = self.tx.subscribe();
        let epoch = *rx.borrow();
        ShutdownSignal { rx, epoch }
    }

    /// Cancel everything subscribed so far.
    pub fn trigger(&self) {
        self.tx.send_modify(|epoch| *epoch += 1);
    }

    pub fn epoch(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Get the number of live signals.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes cancellation of the epoch it was created in.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<u64>,
    epoch: u64,
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() != self.epoch
    }

    /// Resolves once the epoch this signal belongs to is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() != self.epoch {
                return;
            }
            if rx.changed().await.is_err() {
                // Coordinator dropped: nothing can cancel us anymore.
                std::future::pending::<()>().await;
            }
        }
    }
}
