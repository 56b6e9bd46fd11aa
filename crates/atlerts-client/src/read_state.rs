//! Read-state reconciliation.
//!
//! Marking is idempotent: a message is written at most once per tracker
//! until the cache or a store read confirms it read, so re-running a pass
//! with no new deltas costs nothing. Confirmed and vanished messages drop
//! their reservation.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use atlerts_shared::constants::{FIELD_FROM_ID, FIELD_IS_READ};
use atlerts_shared::{ConversationId, Message, UserIdentity};
use atlerts_store::{Document, DocumentPath, DocumentStore, Patch, StoreError, UpdateOp};

use crate::codec::{decode_message, message_path, messages_collection};
use crate::error::Result;
use crate::unread::{conversation_unread_query, global_query, is_unread_for};

/// Outcome of one mark-read pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkReadReport {
    /// Writes that reached the store.
    pub written: usize,
    /// Targets that no longer exist; counted as done.
    pub stale: usize,
    /// Writes that failed transiently and will be retried by the next pass.
    pub failed: usize,
    /// Already written by an earlier pass, waiting for confirmation.
    pub pending: usize,
}

#[derive(Clone)]
pub struct ReadStateTracker {
    store: Arc<dyn DocumentStore>,
    marked: Arc<Mutex<HashSet<DocumentPath>>>,
}

impl ReadStateTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            marked: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Mark every message of `conversation` that `local` has not written and
    /// has not read yet. Uses `cached` when given, otherwise reads the
    /// conversation's unread messages from the store.
    pub async fn mark_conversation_read(
        &self,
        conversation: &ConversationId,
        local: &UserIdentity,
        cached: Option<&[Message]>,
    ) -> Result<MarkReadReport> {
        let fetched;
        let messages: &[Message] = match cached {
            Some(messages) => messages,
            None => {
                let docs = self.store.query(&conversation_unread_query(conversation)?).await?;
                self.release_confirmed(conversation, &docs)?;
                fetched = docs
                    .iter()
                    .filter_map(|doc| match decode_message(doc) {
                        Ok(message) => Some(message),
                        Err(e) => {
                            warn!(error = %e, "Skipping undecodable message");
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                &fetched
            }
        };

        let mut targets = Vec::new();
        let mut report = MarkReadReport::default();
        {
            let mut marked = self.marked.lock();
            for message in messages {
                let path = message_path(conversation, &message.id)?;
                if message.is_read {
                    marked.remove(&path);
                    continue;
                }
                if !is_unread_for(message, local) {
                    continue;
                }
                if marked.insert(path.clone()) {
                    targets.push((path, mark_read_patch(message)));
                } else {
                    report.pending += 1;
                }
            }
        }

        for (path, patch) in targets {
            match self.store.update(&path, patch).await {
                Ok(()) => report.written += 1,
                Err(e) if e.is_stale() => {
                    debug!(path = %path, "Message vanished before it could be marked read");
                    self.marked.lock().remove(&path);
                    report.stale += 1;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to mark message read, will retry");
                    self.marked.lock().remove(&path);
                    report.failed += 1;
                }
            }
        }

        if report.written > 0 || report.failed > 0 {
            debug!(
                conversation = %conversation,
                written = report.written,
                failed = report.failed,
                "Mark-read pass finished"
            );
        }
        Ok(report)
    }

    /// Drop reservations in `conversation` that the store no longer reports
    /// unread.
    fn release_confirmed(&self, conversation: &ConversationId, unread: &[Document]) -> Result<()> {
        let collection = messages_collection(conversation)?;
        let unread: HashSet<&DocumentPath> = unread.iter().map(|doc| &doc.path).collect();
        self.marked
            .lock()
            .retain(|path| path.parent() != collection || unread.contains(path));
        Ok(())
    }

    /// Mark every unread message addressed to `local` read in one atomic
    /// batch. Clears badges left behind by clients that never marked their
    /// messages. Returns the number of messages updated.
    pub async fn repair_unread(&self, local: &UserIdentity) -> Result<usize> {
        let docs = self.store.query(&global_query(local)).await?;

        let ops: Vec<UpdateOp> = docs
            .iter()
            .filter_map(|doc| {
                let message = decode_message(doc).ok()?;
                is_unread_for(&message, local)
                    .then(|| UpdateOp::new(doc.path.clone(), mark_read_patch(&message)))
            })
            .collect();

        if ops.is_empty() {
            return Ok(0);
        }

        let count = ops.len();
        match self.store.batch_update(ops).await {
            Ok(()) => {
                info!(user = %local, count, "Repaired unread messages");
                Ok(count)
            }
            Err(StoreError::NotFound(path)) => {
                // Batches are atomic; a vanished message means nothing was
                // applied. The next repair sees the current set.
                warn!(path = %path, "Unread repair raced with a deletion");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `isRead = true`, plus the canonical author field for documents that only
/// carried the legacy one.
fn mark_read_patch(message: &Message) -> Patch {
    let patch = Patch::new().set(FIELD_IS_READ, true);
    if message.legacy_author {
        patch.set(FIELD_FROM_ID, message.from_id.as_str())
    } else {
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fields, seed_message, user};
    use atlerts_shared::{resolve_conversation_id, MessageId};
    use atlerts_store::{DocumentPath, MemoryStore};
    use serde_json::json;

    fn setup() -> (MemoryStore, ReadStateTracker) {
        let store = MemoryStore::new();
        let tracker = ReadStateTracker::new(Arc::new(store.clone()));
        (store, tracker)
    }

    fn alice_bob() -> ConversationId {
        resolve_conversation_id(&user("alice"), Some(&user("bob"))).unwrap()
    }

    fn is_read(store: &MemoryStore, path: &DocumentPath) -> bool {
        store.document(path).unwrap().get("isRead") == Some(&json!(true))
    }

    #[tokio::test]
    async fn test_marks_only_incoming_unread() {
        let (store, tracker) = setup();
        let incoming = seed_message(&store, "m1", "bob", "alice", 10);
        let outgoing = seed_message(&store, "m2", "alice", "bob", 20);

        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), None)
            .await
            .unwrap();

        assert_eq!(report.written, 1);
        assert!(is_read(&store, &incoming));
        assert!(!is_read(&store, &outgoing));
        assert_eq!(store.stats().updates, 1);
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let (store, tracker) = setup();
        seed_message(&store, "m1", "bob", "alice", 10);
        seed_message(&store, "m2", "bob", "alice", 20);

        tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), None)
            .await
            .unwrap();
        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), None)
            .await
            .unwrap();

        assert_eq!(report, MarkReadReport::default());
        assert_eq!(store.stats().updates, 2);
    }

    #[tokio::test]
    async fn test_stale_cache_does_not_rewrite() {
        let (store, tracker) = setup();
        seed_message(&store, "m1", "bob", "alice", 10);
        let stale_cache = vec![crate::test_support::message("m1", "bob", "alice", 10)];

        tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&stale_cache))
            .await
            .unwrap();
        // The cache has not caught up yet; the write must not be repeated.
        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&stale_cache))
            .await
            .unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.pending, 1);
        assert_eq!(store.stats().updates, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_next_pass() {
        let (store, tracker) = setup();
        let path = seed_message(&store, "m1", "bob", "alice", 10);
        let cache = vec![crate::test_support::message("m1", "bob", "alice", 10)];

        store.fail_next(1);
        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(!is_read(&store, &path));

        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        assert_eq!(report.written, 1);
        assert!(is_read(&store, &path));
    }

    #[tokio::test]
    async fn test_vanished_message_counts_as_done() {
        let (_store, tracker) = setup();
        let cache = vec![crate::test_support::message("ghost", "bob", "alice", 10)];

        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_vanished_message_releases_reservation() {
        let (store, tracker) = setup();
        let cache = vec![crate::test_support::message("m1", "bob", "alice", 10)];

        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        assert_eq!(report.stale, 1);
        assert!(tracker.marked.lock().is_empty());

        // Recreated under the same id: the next pass must write it.
        let path = seed_message(&store, "m1", "bob", "alice", 10);
        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        assert_eq!(report.written, 1);
        assert!(is_read(&store, &path));
    }

    #[tokio::test]
    async fn test_store_pass_releases_confirmed_reservations() {
        let (store, tracker) = setup();
        seed_message(&store, "m1", "bob", "alice", 10);
        seed_message(&store, "m2", "bob", "alice", 20);
        let elsewhere = resolve_conversation_id(&user("alice"), Some(&user("carol"))).unwrap();
        seed_message(&store, "m3", "carol", "alice", 30);
        let cache = vec![
            crate::test_support::message("m1", "bob", "alice", 10),
            crate::test_support::message("m2", "bob", "alice", 20),
        ];
        let other_cache = vec![crate::test_support::message("m3", "carol", "alice", 30)];

        tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), Some(&cache))
            .await
            .unwrap();
        tracker
            .mark_conversation_read(&elsewhere, &user("alice"), Some(&other_cache))
            .await
            .unwrap();
        assert_eq!(tracker.marked.lock().len(), 3);

        // Nothing is unread any more, so nothing in this conversation stays
        // reserved. The other conversation is left alone.
        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), None)
            .await
            .unwrap();
        assert_eq!(report, MarkReadReport::default());
        let marked = tracker.marked.lock().clone();
        assert_eq!(marked.len(), 1);
        assert!(marked.contains(&message_path(&elsewhere, &MessageId("m3".into())).unwrap()));
    }

    #[tokio::test]
    async fn test_legacy_author_is_canonicalized() {
        let (store, tracker) = setup();
        let path = DocumentPath::new("conversations/alice_bob/messages/old").unwrap();
        store.insert(
            path.clone(),
            fields(json!({
                "senderId": "bob",
                "toId": "alice",
                "text": "from the old app",
                "timestamp": 5,
                "isRead": false
            })),
        );

        let report = tracker
            .mark_conversation_read(&alice_bob(), &user("alice"), None)
            .await
            .unwrap();
        assert_eq!(report.written, 1);

        let doc = store.document(&path).unwrap();
        assert_eq!(doc.get("isRead"), Some(&json!(true)));
        assert_eq!(doc.get("fromId"), Some(&json!("bob")));
    }

    #[tokio::test]
    async fn test_repair_unread_uses_one_batch() {
        let (store, tracker) = setup();
        seed_message(&store, "m1", "bob", "alice", 10);
        seed_message(&store, "m2", "carol", "alice", 20);
        seed_message(&store, "m3", "alice", "bob", 30);

        let repaired = tracker.repair_unread(&user("alice")).await.unwrap();
        assert_eq!(repaired, 2);

        let stats = store.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.batched_ops, 2);
        assert_eq!(stats.updates, 0);

        assert_eq!(tracker.repair_unread(&user("alice")).await.unwrap(), 0);
        assert_eq!(store.stats().batches, 1);
    }
}
