//! Single-subscription owner.
//!
//! A slot (a chat screen, a directory row, the global badge, the broadcast
//! feed) holds at most one live subscription. Installing a new one closes the
//! previous one first, and a batch already queued by a closed subscription is
//! discarded rather than applied.
//!
//! Lock order: `active`, then `generation`, then whatever state the batch
//! handler touches. Never call [`SubscriptionSlot::close`] while holding a
//! lock the handler takes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use atlerts_store::{SnapshotEvent, Subscription, SubscriptionHandle, SubscriptionId};

struct Active {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

pub struct SubscriptionSlot {
    name: String,
    active: Mutex<Option<Active>>,
    /// Bumped on every install and close. A pump only applies a batch while
    /// holding this lock and seeing its own generation.
    generation: Arc<Mutex<u64>>,
}

impl SubscriptionSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: Mutex::new(None),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Take ownership of `subscription` and feed its batches to `on_batch`,
    /// in order, until the slot is closed or re-installed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install<F>(&self, subscription: Subscription, mut on_batch: F)
    where
        F: FnMut(SnapshotEvent) + Send + 'static,
    {
        let mut active = self.active.lock();
        let generation = {
            let mut current = self.generation.lock();
            *current += 1;
            *current
        };
        if let Some(previous) = active.take() {
            Self::shutdown(&self.name, previous);
        }

        let (handle, mut events) = subscription.into_parts();
        let id = handle.id();
        let gate = self.generation.clone();
        let name = self.name.clone();

        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let current = gate.lock();
                if *current != generation {
                    trace!(slot = %name, subscription = %id, "Dropping batch from closed subscription");
                    break;
                }
                on_batch(event);
            }
        });

        debug!(slot = %self.name, subscription = %id, "Subscription installed");
        *active = Some(Active { handle, pump });
    }

    /// Close the current subscription, if any. Once this returns no further
    /// batch from it will be applied. Returns whether anything was open.
    pub fn close(&self) -> bool {
        let mut active = self.active.lock();
        *self.generation.lock() += 1;
        match active.take() {
            Some(previous) => {
                Self::shutdown(&self.name, previous);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.active.lock().as_ref().map(|a| a.handle.id())
    }

    fn shutdown(name: &str, mut previous: Active) {
        let id = previous.handle.id();
        previous.handle.close();
        previous.pump.abort();
        debug!(slot = %name, subscription = %id, "Subscription closed");
    }
}

impl Drop for SubscriptionSlot {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::settle;
    use atlerts_store::{CollectionPath, DocumentStore, MemoryStore, Query};
    use serde_json::json;

    fn collection() -> CollectionPath {
        CollectionPath::new("broadcasts").unwrap()
    }

    #[tokio::test]
    async fn test_batches_are_applied_in_order() {
        let store = MemoryStore::new();
        let slot = SubscriptionSlot::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sub = store.subscribe(Query::collection(collection())).await.unwrap();
        let sink = seen.clone();
        slot.install(sub, move |event| {
            sink.lock().push(matches!(event, SnapshotEvent::Snapshot(_)));
        });

        for n in 0..3 {
            let fields = json!({ "n": n }).as_object().cloned().unwrap();
            store.write(&collection(), fields).await.unwrap();
        }
        settle().await;

        assert_eq!(*seen.lock(), vec![true, false, false, false]);
        assert!(slot.is_open());
    }

    #[tokio::test]
    async fn test_close_discards_later_batches() {
        let store = MemoryStore::new();
        let slot = SubscriptionSlot::new("test");
        let seen = Arc::new(Mutex::new(0usize));

        let sub = store.subscribe(Query::collection(collection())).await.unwrap();
        let sink = seen.clone();
        slot.install(sub, move |_| *sink.lock() += 1);
        settle().await;
        assert_eq!(*seen.lock(), 1);

        assert!(slot.close());
        assert!(!slot.close());
        assert_eq!(store.open_subscriptions(), 0);

        let fields = json!({ "n": 1 }).as_object().cloned().unwrap();
        store.write(&collection(), fields).await.unwrap();
        settle().await;
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test]
    async fn test_install_replaces_previous_subscription() {
        let store = MemoryStore::new();
        let slot = SubscriptionSlot::new("test");

        let first = store.subscribe(Query::collection(collection())).await.unwrap();
        let first_id = first.id();
        slot.install(first, |_| {});

        let second = store.subscribe(Query::collection(collection())).await.unwrap();
        let second_id = second.id();
        slot.install(second, |_| {});

        assert_eq!(store.open_subscriptions(), 1);
        assert_eq!(slot.subscription_id(), Some(second_id));
        assert_ne!(first_id, second_id);
    }
}
