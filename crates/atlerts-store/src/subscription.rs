//! Live query subscriptions.
//!
//! A subscription first yields one [`SnapshotEvent::Snapshot`] with the full
//! result set, then [`SnapshotEvent::Changes`] batches in the order the store
//! committed them. Closing the [`SubscriptionHandle`] (explicitly or by
//! dropping it) stops delivery; batches already queued stay in the receiver
//! and are the consumer's to discard.

use tokio::sync::mpsc;

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One delta relative to the previous result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Initial result set, delivered once.
    Snapshot(Vec<Document>),
    /// Deltas committed together.
    Changes(Vec<Change>),
}

/// Cancellation token for a live subscription.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// `closer` runs exactly once, on the first `close()` or on drop.
    pub fn new(id: SubscriptionId, closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            closer: Some(Box::new(closer)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. Idempotent and synchronous.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A live query: its cancellation handle plus the stream of batches.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, events: mpsc::UnboundedReceiver<SnapshotEvent>) -> Self {
        Self { handle, events }
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// Next batch, or `None` once the subscription is closed and drained.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    pub fn close(&mut self) {
        self.handle.close();
    }

    /// Split so the handle can be kept by the owner while a task drains the
    /// events.
    pub fn into_parts(self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<SnapshotEvent>) {
        (self.handle, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closer_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handle = SubscriptionHandle::new(SubscriptionId(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_closed());
        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = SubscriptionHandle::new(SubscriptionId(7), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
