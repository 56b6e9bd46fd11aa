//! The unread predicate and the queries built on it.
//!
//! Per-conversation, per-peer and global counts are all projections of
//! [`is_unread_for`]. The store-side filters below only narrow the candidate
//! set; the predicate is always re-applied locally.

use std::collections::HashSet;

use tracing::warn;

use atlerts_shared::constants::{FIELD_IS_READ, FIELD_TO_ID, MESSAGES_COLLECTION};
use atlerts_shared::{ConversationId, Message, UserIdentity};
use atlerts_store::{ChangeKind, DocumentPath, Query, SnapshotEvent};

use crate::codec::{decode_message, messages_collection};
use crate::error::Result;

/// Authored by someone other than `viewer` and not yet read.
pub fn is_unread_for(message: &Message, viewer: &UserIdentity) -> bool {
    message.is_unread_for(viewer)
}

/// Every unread message addressed to `viewer`, across all conversations.
pub fn global_query(viewer: &UserIdentity) -> Query {
    Query::collection_group(MESSAGES_COLLECTION)
        .where_eq(FIELD_TO_ID, viewer.as_str())
        .where_eq(FIELD_IS_READ, false)
}

/// Unread messages of one conversation.
pub fn conversation_unread_query(conversation: &ConversationId) -> Result<Query> {
    Ok(Query::collection(messages_collection(conversation)?).where_eq(FIELD_IS_READ, false))
}

/// All messages of one conversation. Ordering happens in the local log,
/// since legacy documents carry `timestamp` instead of `sentAt`.
pub fn conversation_query(conversation: &ConversationId) -> Result<Query> {
    Ok(Query::collection(messages_collection(conversation)?))
}

/// Set of unread message paths maintained from a subscription's batches.
#[derive(Debug)]
pub struct UnreadSet {
    viewer: UserIdentity,
    author: Option<UserIdentity>,
    unread: HashSet<DocumentPath>,
}

impl UnreadSet {
    pub fn new(viewer: UserIdentity) -> Self {
        Self {
            viewer,
            author: None,
            unread: HashSet::new(),
        }
    }

    /// Only count messages written by `author`.
    pub fn from_author(viewer: UserIdentity, author: UserIdentity) -> Self {
        Self {
            viewer,
            author: Some(author),
            unread: HashSet::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.unread.len()
    }

    /// Fold a batch in and return the new count.
    pub fn apply(&mut self, event: SnapshotEvent) -> usize {
        match event {
            SnapshotEvent::Snapshot(docs) => {
                self.unread.clear();
                for doc in &docs {
                    self.track(doc);
                }
            }
            SnapshotEvent::Changes(changes) => {
                for change in &changes {
                    match change.kind {
                        ChangeKind::Removed => {
                            self.unread.remove(&change.document.path);
                        }
                        ChangeKind::Added | ChangeKind::Modified => self.track(&change.document),
                    }
                }
            }
        }
        self.count()
    }

    fn track(&mut self, doc: &atlerts_store::Document) {
        let counts = match decode_message(doc) {
            Ok(message) => {
                is_unread_for(&message, &self.viewer)
                    && self.author.as_ref().map_or(true, |a| message.from_id == *a)
            }
            Err(e) => {
                warn!(error = %e, "Skipping undecodable message");
                false
            }
        };
        if counts {
            self.unread.insert(doc.path.clone());
        } else {
            self.unread.remove(&doc.path);
        }
    }
}
