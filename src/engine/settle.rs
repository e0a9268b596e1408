//! Single-assignment result slot shared by competing completion paths

use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Writer half of a settlement: the first `settle` wins, later calls are no-ops.
pub struct Settlement<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Settlement<T> {
    /// Create a settlement and the receiver that observes its single value.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Returns whether this call was the one that settled.
    pub fn settle(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            // A dropped receiver still counts as settled for the writer.
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
