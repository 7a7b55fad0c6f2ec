/// Failure notification channel.
///
/// Every monitor of a detector pushes a handle to itself here when it
/// declares its peer failed. The queue is unbounded; any number of cloned
/// `FailureChannel` handles may consume from it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::monitor::Monitor;

#[derive(Clone)]
pub struct FailureChannel {
    tx: mpsc::UnboundedSender<Monitor>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Monitor>>>,
}

impl FailureChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub(crate) fn notify(&self, monitor: Monitor) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(monitor);
    }

    /// Wait for the next failed monitor.
    pub async fn recv(&self) -> Option<Monitor> {
        self.rx.lock().await.recv().await
    }

    /// Wait at most `timeout` for the next failed monitor.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Monitor> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Non-blocking poll. Returns `None` when the queue is empty or another
    /// consumer is currently waiting on it.
    pub fn try_recv(&self) -> Option<Monitor> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<Monitor> {
        let mut drained = Vec::new();
        while let Some(monitor) = self.try_recv() {
            drained.push(monitor);
        }
        drained
    }
}

impl std::fmt::Debug for FailureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureChannel").finish_non_exhaustive()
    }
}
