//! Single-use completion signal shared by the two relay directions

use std::sync::Arc;
use tokio::sync::watch;

/// Set once when either relay direction finishes; never reset.
///
/// Waiters registered before or after completion both observe it.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the session complete. Returns `true` for the call that did it.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the session is complete
    pub async fn completed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
