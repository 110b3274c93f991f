//! Single-slot coalescing mailbox.
//!
//! # Responsibilities
//! - Hold at most one pending item; a newer put displaces the older one
//! - Block the worker until an item is available
//! - Account for busy work (pending items plus the one in flight)
//!
//! # Design Decisions
//! - Replace-pending-value semantics: the worker eventually processes the
//!   most recent item enqueued at the time it becomes free, and no
//!   guarantee is made that every intermediate item is processed
//! - `has_pending` lets a retrying worker detect that its item has been
//!   superseded

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// A one-slot queue where a new item replaces any undelivered one.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    busy: AtomicUsize,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            busy: AtomicUsize::new(0),
        }
    }

    /// Place an item, displacing any pending one. Returns true when an
    /// undelivered item was discarded.
    pub fn put(&self, item: T) -> bool {
        let displaced;
        {
            let mut slot = self.slot.lock().expect("mailbox poisoned");
            self.busy.fetch_add(1, Ordering::SeqCst);
            displaced = slot.take().is_some();
            if displaced {
                // The displaced item is discarded, not processed.
                self.busy.fetch_sub(1, Ordering::SeqCst);
            }
            *slot = Some(item);
        }
        self.notify.notify_one();
        displaced
    }

    /// Wait for an item and take it. Exactly one item per call.
    pub async fn take(&self) -> T {
        loop {
            if let Some(item) = self.slot.lock().expect("mailbox poisoned").take() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// True when an undelivered item is waiting in the slot.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().expect("mailbox poisoned").is_some()
    }

    /// Pending items plus any item currently being processed.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Called by the worker after it finishes processing a taken item.
    pub fn complete(&self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
