//! Single-permit gate serializing INVITE/ACK exchanges on a dialog
//!
//! A back-to-back user agent must not send a re-INVITE while the ACK for the
//! previous INVITE is outstanding. The permit is taken when a 2xx to an INVITE
//! is sent (or a re-INVITE is about to be sent) and released exactly once,
//! when the ACK is seen or the exchange fails.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub struct AckGate {
    semaphore: Arc<Semaphore>,
    held: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Default for AckGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AckGate {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            held: Mutex::new(None),
        }
    }

    /// Takes the permit if it is free
    pub fn try_acquire(&self) -> bool {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                *self.held.lock() = Some(permit);
                true
            }
            Err(_) => false,
        }
    }

    /// Waits up to `timeout` for the permit
    pub async fn acquire(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                *self.held.lock() = Some(permit);
                true
            }
            _ => false,
        }
    }

    /// Releases the permit; returns false if it was not held
    pub fn release(&self) -> bool {
        self.held.lock().take().is_some()
    }

    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    /// Stops all waiters; used when the dialog terminates
    pub fn close(&self) {
        self.release();
        self.semaphore.close();
    }
}
