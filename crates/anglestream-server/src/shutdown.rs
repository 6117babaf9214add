//! Cooperative stop flag shared by the accept loop and every session.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable, one-way stop flag.
///
/// [`trigger`](Self::trigger) is synchronous so it can be called from a
/// Ctrl-C handler or any other non-async context; tasks either poll
/// [`is_triggered`](Self::is_triggered) at their tick boundary or await
/// [`triggered`](Self::triggered).
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`trigger`](Self::trigger) has been called, immediately
    /// if it already was.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
