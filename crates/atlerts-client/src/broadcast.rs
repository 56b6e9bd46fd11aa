//! Announcement feed with per-user read receipts.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use atlerts_shared::constants::{FIELD_READ_BY, FIELD_SENT_AT};
use atlerts_shared::{BroadcastId, BroadcastMessage, BroadcastReply, UserIdentity, UserProfile};
use atlerts_store::document::encode;
use atlerts_store::{ChangeKind, Direction, Document, DocumentStore, Patch, Query, SnapshotEvent};

use crate::codec::{
    broadcast_path, broadcasts_collection, decode_broadcast, decode_profile, decode_reply,
    replies_collection, users_collection,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, EngineEvent, EventBus, NewBroadcastPayload};
use crate::slot::SubscriptionSlot;

#[derive(Default)]
struct FeedState {
    /// Newest first.
    items: Vec<BroadcastMessage>,
    initialized: bool,
}

impl FeedState {
    fn position(&self, id: &BroadcastId) -> Option<usize> {
        self.items.iter().position(|b| &b.id == id)
    }

    fn upsert(&mut self, broadcast: BroadcastMessage) {
        if let Some(at) = self.position(&broadcast.id) {
            self.items.remove(at);
        }
        let key = (broadcast.sent_at, &broadcast.id);
        let at = self.items.partition_point(|b| (b.sent_at, &b.id) > key);
        self.items.insert(at, broadcast);
    }
}

pub struct BroadcastFeed {
    store: Arc<dyn DocumentStore>,
    config: ClientConfig,
    events: EventBus,
    state: Arc<Mutex<FeedState>>,
    slot: SubscriptionSlot,
    revision: Arc<watch::Sender<u64>>,
}

impl BroadcastFeed {
    pub fn new(store: Arc<dyn DocumentStore>, config: ClientConfig, events: EventBus) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store,
            config,
            events,
            state: Arc::new(Mutex::new(FeedState::default())),
            slot: SubscriptionSlot::new("broadcasts"),
            revision: Arc::new(revision),
        }
    }

    /// Subscribe to the most recent broadcasts. Reopening replaces the
    /// previous subscription.
    pub async fn open(&self) -> Result<()> {
        let query = Query::collection(broadcasts_collection()?)
            .order_by(FIELD_SENT_AT, Direction::Descending)
            .limit(self.config.broadcast_feed_limit);

        self.close();
        let subscription = self.store.subscribe(query).await?;

        let state = self.state.clone();
        let revision = self.revision.clone();
        let events = self.events.clone();
        self.slot.install(subscription, move |event| {
            let arrivals = apply_batch(&mut state.lock(), event);
            revision.send_modify(|r| *r += 1);
            for broadcast in arrivals {
                info!(broadcast = %broadcast.broadcast_id, "New broadcast arrived");
                emit_event(&events, EngineEvent::NewBroadcast(broadcast));
            }
        });

        debug!(limit = self.config.broadcast_feed_limit, "Broadcast feed opened");
        Ok(())
    }

    pub fn close(&self) {
        self.slot.close();
        *self.state.lock() = FeedState::default();
        self.revision.send_modify(|r| *r += 1);
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    /// Post an announcement on behalf of `sender`.
    pub async fn publish(
        &self,
        text: impl Into<String>,
        attachment_url: Option<String>,
        sender: &UserProfile,
    ) -> Result<BroadcastId> {
        let text = text.into();
        if text.trim().is_empty() && attachment_url.is_none() {
            return Err(ClientError::EmptyMessage);
        }

        let broadcast = BroadcastMessage {
            id: BroadcastId::default(),
            text,
            sender_name: sender.name.clone(),
            role: sender.role.clone(),
            attachment_url,
            sent_at: Utc::now(),
            read_by: Default::default(),
        };
        let id = self
            .store
            .write(&broadcasts_collection()?, encode(&broadcast)?)
            .await?;

        info!(broadcast = %id, sender = %sender.uid, "Broadcast published");
        Ok(BroadcastId(id))
    }

    /// Record that `user` has seen `broadcast`. Returns `false` without
    /// writing when the cache already shows the receipt.
    pub async fn mark_received(&self, broadcast: &BroadcastId, user: &UserIdentity) -> Result<bool> {
        let already = {
            let state = self.state.lock();
            state
                .position(broadcast)
                .map_or(false, |at| state.items[at].was_read_by(user))
        };
        if already {
            return Ok(false);
        }

        let patch = Patch::new().array_union(FIELD_READ_BY, [user.as_str()]);
        self.store.update(&broadcast_path(broadcast)?, patch).await?;
        debug!(broadcast = %broadcast, user = %user, "Broadcast marked received");
        Ok(true)
    }

    /// Profiles of the earliest readers of `broadcast`, in receipt order,
    /// at most `receipt_lookup_limit` of them.
    pub async fn read_receipts(&self, broadcast: &BroadcastId) -> Result<Vec<UserProfile>> {
        let cached = {
            let state = self.state.lock();
            state
                .position(broadcast)
                .map(|at| state.items[at].read_by.clone())
        };
        let readers = match cached {
            Some(readers) => readers,
            None => {
                let docs = self
                    .store
                    .get_all(&broadcasts_collection()?, &[broadcast.to_string()])
                    .await?;
                let doc = docs
                    .first()
                    .ok_or_else(|| ClientError::StaleWrite(broadcast.to_string()))?;
                decode_broadcast(doc)?.read_by
            }
        };

        let ids: Vec<String> = readers
            .iter()
            .take(self.config.receipt_lookup_limit)
            .map(|u| u.to_string())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.store.get_all(&users_collection()?, &ids).await?;
        Ok(docs.iter().filter_map(decode_logged_profile).collect())
    }

    /// Answer a broadcast. Replies live under the broadcast document.
    pub async fn reply(
        &self,
        broadcast: &BroadcastId,
        text: impl Into<String>,
        sender: &UserProfile,
    ) -> Result<String> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let reply = BroadcastReply {
            id: String::new(),
            text,
            sender_id: sender.uid.clone(),
            sender_name: sender.name.clone(),
            sent_at: Utc::now(),
        };
        let id = self
            .store
            .write(&replies_collection(broadcast)?, encode(&reply)?)
            .await?;
        debug!(broadcast = %broadcast, reply = %id, "Broadcast reply posted");
        Ok(id)
    }

    /// Replies to `broadcast`, oldest first.
    pub async fn replies(&self, broadcast: &BroadcastId) -> Result<Vec<BroadcastReply>> {
        let query = Query::collection(replies_collection(broadcast)?)
            .order_by(FIELD_SENT_AT, Direction::Ascending);
        let docs = self.store.query(&query).await?;
        docs.iter().map(decode_reply).collect()
    }

    /// Cached broadcasts, newest first.
    pub fn items(&self) -> Vec<BroadcastMessage> {
        self.state.lock().items.clone()
    }

    pub fn unread_count(&self, user: &UserIdentity) -> usize {
        self.state
            .lock()
            .items
            .iter()
            .filter(|b| !b.was_read_by(user))
            .count()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Fold a batch into the feed. Returns the broadcasts that count as new
/// arrivals: after the initial snapshot, a batch that grows the feed or adds
/// something newer than everything cached.
fn apply_batch(state: &mut FeedState, event: SnapshotEvent) -> Vec<NewBroadcastPayload> {
    match event {
        SnapshotEvent::Snapshot(docs) => {
            state.items.clear();
            for broadcast in docs.iter().filter_map(decode_logged_broadcast) {
                state.upsert(broadcast);
            }
            state.initialized = true;
            Vec::new()
        }
        SnapshotEvent::Changes(changes) => {
            let before = state.items.len();
            let newest_before = state.items.first().map(|b| b.sent_at);
            let mut added = Vec::new();

            for change in changes {
                match change.kind {
                    ChangeKind::Removed => {
                        let id = BroadcastId(change.document.id().to_string());
                        if let Some(at) = state.position(&id) {
                            state.items.remove(at);
                        }
                    }
                    ChangeKind::Added | ChangeKind::Modified => {
                        let Some(broadcast) = decode_logged_broadcast(&change.document) else {
                            continue;
                        };
                        if change.kind == ChangeKind::Added {
                            added.push(NewBroadcastPayload {
                                broadcast_id: broadcast.id.to_string(),
                                sender_name: broadcast.sender_name.clone(),
                            });
                        }
                        state.upsert(broadcast);
                    }
                }
            }

            if !state.initialized {
                return Vec::new();
            }
            let grew = state.items.len() > before;
            let newer = match (newest_before, state.items.first()) {
                (Some(old), Some(now)) => now.sent_at > old,
                (None, Some(_)) => true,
                _ => false,
            };
            if grew || (newer && !added.is_empty()) {
                added
            } else {
                Vec::new()
            }
        }
    }
}

fn decode_logged_broadcast(doc: &Document) -> Option<BroadcastMessage> {
    match decode_broadcast(doc) {
        Ok(broadcast) => Some(broadcast),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable broadcast");
            None
        }
    }
}

fn decode_logged_profile(doc: &Document) -> Option<UserProfile> {
    match decode_profile(doc) {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable profile");
            None
        }
    }
}
