//! One-shot terminal signal for a download

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

/// Delivers a download's result exactly once.
///
/// The first `settle` wins; every later call is ignored and returns `false`.
pub struct TerminalSignal<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> TerminalSignal<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Settle the signal. Returns `true` only for the call that settled it.
    pub fn settle(&self, value: T) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                // A dropped receiver just means nobody is waiting any more
                let _ = tx.send(value);
                true
            }
            None => {
                debug!("Terminal signal already settled, ignoring");
                false
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.lock().is_none()
    }
}
