//! In-process document store.
//!
//! Every live query is re-evaluated after each committed mutation and the
//! difference against its previous result set is pushed to the subscriber as
//! one [`SnapshotEvent::Changes`] batch. A mutation is committed and fanned
//! out under a single lock, so batches reach each subscriber in commit order.
//!
//! Besides the [`DocumentStore`] contract the store keeps operation counters,
//! a log of subscription opens/closes and a transient-failure switch, which
//! is what the engine's tests assert against.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::document::{CollectionPath, Document, DocumentPath, Fields, Patch, UpdateOp};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::store::DocumentStore;
use crate::subscription::{
    Change, ChangeKind, SnapshotEvent, Subscription, SubscriptionHandle, SubscriptionId,
};

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub queries: usize,
    pub writes: usize,
    pub updates: usize,
    pub batches: usize,
    pub batched_ops: usize,
}

/// Entry of the subscription lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Opened { id: SubscriptionId, query: String },
    Closed { id: SubscriptionId },
}

struct Listener {
    query: Query,
    results: Vec<Document>,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<DocumentPath, Fields>,
    listeners: BTreeMap<SubscriptionId, Listener>,
    next_subscription: u64,
    stats: StoreStats,
    log: Vec<SubscriptionEvent>,
    failures_pending: usize,
}

impl Inner {
    fn take_failure(&mut self, operation: &str) -> Result<()> {
        if self.failures_pending > 0 {
            self.failures_pending -= 1;
            debug!(operation, "Injected transient store failure");
            return Err(StoreError::TransientIo(format!("{operation}: connection lost")));
        }
        Ok(())
    }

    fn all_documents(&self) -> Vec<Document> {
        self.documents
            .iter()
            .map(|(path, fields)| Document::new(path.clone(), fields.clone()))
            .collect()
    }

    /// Re-evaluate every live query and push the deltas.
    fn notify(&mut self) {
        let docs = self.all_documents();
        for (id, listener) in self.listeners.iter_mut() {
            let results = listener.query.evaluate(&docs);
            let changes = diff(&listener.results, &results);
            listener.results = results;

            if changes.is_empty() {
                continue;
            }
            trace!(subscription = %id, changes = changes.len(), "Delivering changes");
            if listener.tx.send(SnapshotEvent::Changes(changes)).is_err() {
                debug!(subscription = %id, "Subscriber dropped its receiver");
            }
        }
    }
}

fn diff(previous: &[Document], current: &[Document]) -> Vec<Change> {
    let before: HashMap<&DocumentPath, &Document> =
        previous.iter().map(|doc| (&doc.path, doc)).collect();
    let after: HashMap<&DocumentPath, &Document> =
        current.iter().map(|doc| (&doc.path, doc)).collect();

    let mut changes: Vec<Change> = previous
        .iter()
        .filter(|doc| !after.contains_key(&doc.path))
        .map(|doc| Change {
            kind: ChangeKind::Removed,
            document: doc.clone(),
        })
        .collect();

    for doc in current {
        match before.get(&doc.path) {
            None => changes.push(Change {
                kind: ChangeKind::Added,
                document: doc.clone(),
            }),
            Some(old) if old.fields != doc.fields => changes.push(Change {
                kind: ChangeKind::Modified,
                document: doc.clone(),
            }),
            Some(_) => {}
        }
    }
    changes
}

/// Shared, cloneable handle to an in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a document at an explicit path, bypassing the
    /// counters. Live queries are notified as for any write.
    pub fn insert(&self, path: DocumentPath, fields: Fields) {
        let mut inner = self.inner.lock();
        inner.documents.insert(path, fields);
        inner.notify();
    }

    pub fn document(&self, path: &DocumentPath) -> Option<Document> {
        self.inner
            .lock()
            .documents
            .get(path)
            .map(|fields| Document::new(path.clone(), fields.clone()))
    }

    /// Direct children of a collection, in path order.
    pub fn documents_in(&self, collection: &CollectionPath) -> Vec<Document> {
        Query::collection(collection.clone()).evaluate(&self.inner.lock().all_documents())
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock().stats
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = StoreStats::default();
    }

    pub fn open_subscriptions(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn subscription_log(&self) -> Vec<SubscriptionEvent> {
        self.inner.lock().log.clone()
    }

    /// Make the next `count` operations fail with
    /// [`StoreError::TransientIo`].
    pub fn fail_next(&self, count: usize) {
        self.inner.lock().failures_pending = count;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut inner = self.inner.lock();
        inner.take_failure("query")?;
        inner.stats.queries += 1;
        Ok(query.evaluate(&inner.all_documents()))
    }

    async fn get_all(&self, collection: &CollectionPath, ids: &[String]) -> Result<Vec<Document>> {
        let mut inner = self.inner.lock();
        inner.take_failure("get_all")?;
        inner.stats.queries += 1;
        Ok(ids
            .iter()
            .map(|id| collection.doc(id))
            .filter_map(|path| {
                inner
                    .documents
                    .get(&path)
                    .map(|fields| Document::new(path.clone(), fields.clone()))
            })
            .collect())
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        let mut inner = self.inner.lock();
        inner.take_failure("subscribe")?;

        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        let results = query.evaluate(&inner.all_documents());

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(SnapshotEvent::Snapshot(results.clone()));

        let description = query.to_string();
        debug!(subscription = %id, query = %description, "Subscription opened");
        inner.log.push(SubscriptionEvent::Opened {
            id,
            query: description,
        });
        inner.listeners.insert(id, Listener { query, results, tx });

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock();
                if inner.listeners.remove(&id).is_some() {
                    inner.log.push(SubscriptionEvent::Closed { id });
                    debug!(subscription = %id, "Subscription closed");
                }
            }
        });

        Ok(Subscription::new(handle, rx))
    }

    async fn write(&self, collection: &CollectionPath, fields: Fields) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.take_failure("write")?;

        let id = Uuid::new_v4().simple().to_string();
        let path = collection.doc(&id);
        inner.documents.insert(path, fields);
        inner.stats.writes += 1;
        inner.notify();
        Ok(id)
    }

    async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure("update")?;

        let fields = inner
            .documents
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        patch.apply(fields);
        inner.stats.updates += 1;
        inner.notify();
        Ok(())
    }

    async fn batch_update(&self, ops: Vec<UpdateOp>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure("batch_update")?;

        if let Some(missing) = ops.iter().find(|op| !inner.documents.contains_key(&op.path)) {
            return Err(StoreError::NotFound(missing.path.to_string()));
        }

        for op in &ops {
            if let Some(fields) = inner.documents.get_mut(&op.path) {
                op.patch.apply(fields);
            }
        }
        inner.stats.batches += 1;
        inner.stats.batched_ops += ops.len();
        inner.notify();
        Ok(())
    }
}
