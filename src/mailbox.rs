//! Single-slot "latest wins" hand-off between the listener thread and the
//! consumer tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    slot: Mutex<Option<String>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Holds at most one undelivered payload. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    inner: Arc<Inner>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload`, replacing any payload the consumer has not taken yet.
    pub fn publish(&self, payload: String) {
        let replaced = self.lock().replace(payload);
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        if replaced.is_some() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and clear the pending payload.
    pub fn try_take(&self) -> Option<String> {
        self.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Total payloads published since creation.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Payloads overwritten before the consumer took them.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    // A panic while holding the lock cannot leave the Option half-written.
    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
