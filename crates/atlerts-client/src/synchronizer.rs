//! Live, ordered view of one conversation.
//!
//! The synchronizer owns its [`MessageLog`]. Batches from the conversation's
//! subscription are folded into the log as they arrive; while the
//! conversation is active every batch is followed by a mark-read pass over
//! the refreshed cache.
//!
//! A synchronizer bound to a session refuses to act for its user once that
//! user is no longer the one signed in.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use atlerts_shared::{
    counterpart, resolve_conversation_id, ConversationId, Message, MessageId, UserIdentity,
};
use atlerts_store::document::encode;
use atlerts_store::{ChangeKind, Document, DocumentStore, SnapshotEvent};

use crate::codec::{decode_message, messages_collection};
use crate::config::ClientConfig;
use crate::error::{ClientError, Draft, Result, SendFailure};
use crate::events::{emit_event, EngineEvent, EventBus, NewMessagePayload};
use crate::message_log::MessageLog;
use crate::read_state::{MarkReadReport, ReadStateTracker};
use crate::session::SessionProvider;
use crate::slot::SubscriptionSlot;
use crate::unread::conversation_query;

#[derive(Default)]
struct ChatState {
    conversation: Option<ConversationId>,
    recipient: Option<UserIdentity>,
    log: MessageLog,
    active: bool,
    loaded: bool,
}

pub struct MessageStreamSynchronizer {
    store: Arc<dyn DocumentStore>,
    local: UserIdentity,
    config: ClientConfig,
    tracker: ReadStateTracker,
    events: EventBus,
    session: Option<Arc<dyn SessionProvider>>,
    state: Arc<Mutex<ChatState>>,
    slot: SubscriptionSlot,
    revision: Arc<watch::Sender<u64>>,
}

impl MessageStreamSynchronizer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        local: UserIdentity,
        config: ClientConfig,
        tracker: ReadStateTracker,
        events: EventBus,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let slot = SubscriptionSlot::new(format!("chat:{local}"));
        Self {
            store,
            local,
            config,
            tracker,
            events,
            session: None,
            state: Arc::new(Mutex::new(ChatState::default())),
            slot,
            revision: Arc::new(revision),
        }
    }

    /// Only act while `session` reports the local user as signed in.
    pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    fn ensure_signed_in(&self) -> Result<()> {
        if signed_in_as(self.session.as_deref(), &self.local) {
            Ok(())
        } else {
            Err(ClientError::NotSignedIn)
        }
    }

    /// Follow `conversation`. The recipient of sent messages is the other
    /// participant, or the support agent for a one-party conversation.
    pub async fn open(&self, conversation: ConversationId) -> Result<()> {
        let recipient = match counterpart(&conversation, &self.local)? {
            Some(peer) => peer,
            None => self.config.support_agent_id.clone(),
        };
        self.open_conversation(conversation, recipient).await
    }

    pub async fn open_with_peer(&self, peer: &UserIdentity) -> Result<()> {
        let conversation = resolve_conversation_id(&self.local, Some(peer))?;
        self.open_conversation(conversation, peer.clone()).await
    }

    /// Open the local user's helpdesk conversation.
    pub async fn open_support(&self) -> Result<()> {
        let conversation = resolve_conversation_id(&self.local, None)?;
        let agent = self.config.support_agent_id.clone();
        self.open_conversation(conversation, agent).await
    }

    async fn open_conversation(
        &self,
        conversation: ConversationId,
        recipient: UserIdentity,
    ) -> Result<()> {
        let query = conversation_query(&conversation)?;
        self.ensure_signed_in()?;

        // The previous conversation is gone before the new one is requested.
        self.close();
        {
            let mut state = self.state.lock();
            state.conversation = Some(conversation.clone());
            state.recipient = Some(recipient);
            state.active = true;
        }

        let subscription = match self.store.subscribe(query).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Failed to open conversation");
                self.reset_state();
                return Err(e.into());
            }
        };

        // A concurrent open or close won while we were waiting.
        if self.state.lock().conversation.as_ref() != Some(&conversation) {
            debug!(conversation = %conversation, "Conversation superseded before it opened");
            return Ok(());
        }
        if let Err(e) = self.ensure_signed_in() {
            debug!(conversation = %conversation, "Session ended before the conversation opened");
            self.reset_state();
            return Err(e);
        }

        let handler = BatchHandler {
            conversation: conversation.clone(),
            local: self.local.clone(),
            state: self.state.clone(),
            revision: self.revision.clone(),
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            session: self.session.clone(),
            mark_read_on_arrival: self.config.mark_read_on_arrival,
        };
        self.slot.install(subscription, move |event| handler.apply(event));

        info!(conversation = %conversation, user = %self.local, "Conversation opened");
        Ok(())
    }

    /// Stop following the current conversation and drop the cache.
    pub fn close(&self) {
        if self.slot.close() {
            debug!(user = %self.local, "Conversation closed");
        }
        self.reset_state();
    }

    fn reset_state(&self) {
        *self.state.lock() = ChatState::default();
        self.revision.send_modify(|r| *r += 1);
    }

    /// Write a new message to the open conversation. Nothing is added to the
    /// cache here; the stored copy arrives through the subscription.
    pub async fn send(
        &self,
        text: impl Into<String>,
        attachment_url: Option<String>,
    ) -> std::result::Result<MessageId, SendFailure> {
        let draft = Draft::new(text, attachment_url);
        let fail = |draft: Draft, error: ClientError| SendFailure { draft, error };

        if draft.is_blank() {
            return Err(fail(draft, ClientError::EmptyMessage));
        }
        if let Err(e) = self.ensure_signed_in() {
            return Err(fail(draft, e));
        }

        let target = {
            let state = self.state.lock();
            state.conversation.clone().zip(state.recipient.clone())
        };
        let Some((conversation, recipient)) = target else {
            return Err(fail(draft, ClientError::NoActiveConversation));
        };

        let message = Message::outgoing(
            conversation.clone(),
            self.local.clone(),
            recipient,
            draft.text.clone(),
            draft.attachment_url.clone(),
        );
        let collection = match messages_collection(&conversation) {
            Ok(collection) => collection,
            Err(e) => return Err(fail(draft, e)),
        };
        let fields = match encode(&message) {
            Ok(fields) => fields,
            Err(e) => return Err(fail(draft, e.into())),
        };

        match self.store.write(&collection, fields).await {
            Ok(id) => {
                debug!(conversation = %conversation, message = %id, "Message sent");
                Ok(MessageId(id))
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Failed to send message");
                Err(fail(draft, e.into()))
            }
        }
    }

    /// Whether the conversation is on screen. Becoming active runs a
    /// mark-read pass over what arrived in the meantime.
    pub fn set_active(&self, active: bool) {
        let signed_in = self.ensure_signed_in().is_ok();
        let pending = {
            let mut state = self.state.lock();
            state.active = active;
            match &state.conversation {
                Some(conversation) if active && signed_in && self.config.mark_read_on_arrival => {
                    Some((conversation.clone(), state.log.messages().to_vec()))
                }
                _ => None,
            }
        };
        if let Some((conversation, messages)) = pending {
            spawn_mark_pass(&self.tracker, conversation, self.local.clone(), messages);
        }
    }

    /// Mark the cached unread messages of the open conversation read.
    pub async fn mark_read(&self) -> Result<MarkReadReport> {
        self.ensure_signed_in()?;
        let (conversation, messages) = {
            let state = self.state.lock();
            let conversation = state
                .conversation
                .clone()
                .ok_or(ClientError::NoActiveConversation)?;
            (conversation, state.log.messages().to_vec())
        };
        self.tracker
            .mark_conversation_read(&conversation, &self.local, Some(&messages))
            .await
    }

    pub fn local_user(&self) -> &UserIdentity {
        &self.local
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.state.lock().conversation.clone()
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Whether the initial snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().log.messages().to_vec()
    }

    /// Unread messages in this conversation addressed to the local user.
    pub fn unread_count(&self) -> usize {
        self.state.lock().log.unread_for(&self.local).count()
    }

    /// Revision counter bumped whenever the cache changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Applies one subscription's batches to the shared chat state.
struct BatchHandler {
    conversation: ConversationId,
    local: UserIdentity,
    state: Arc<Mutex<ChatState>>,
    revision: Arc<watch::Sender<u64>>,
    tracker: ReadStateTracker,
    events: EventBus,
    session: Option<Arc<dyn SessionProvider>>,
    mark_read_on_arrival: bool,
}

impl BatchHandler {
    fn apply(&self, event: SnapshotEvent) {
        let mut arrivals = Vec::new();

        let pending = {
            let mut state = self.state.lock();
            match event {
                SnapshotEvent::Snapshot(docs) => {
                    state.log.reset(docs.iter().filter_map(decode_logged));
                    state.loaded = true;
                }
                SnapshotEvent::Changes(changes) => {
                    for change in changes {
                        match change.kind {
                            ChangeKind::Removed => {
                                state.log.remove(&MessageId(change.document.id().to_string()));
                            }
                            ChangeKind::Added | ChangeKind::Modified => {
                                let Some(message) = decode_logged(&change.document) else {
                                    continue;
                                };
                                if change.kind == ChangeKind::Added
                                    && message.from_id != self.local
                                    && state.log.get(&message.id).is_none()
                                {
                                    arrivals.push(NewMessagePayload {
                                        conversation_id: self.conversation.to_string(),
                                        message_id: message.id.to_string(),
                                        sender: message.from_id.to_string(),
                                        sent_at: message.sent_at.to_rfc3339(),
                                    });
                                }
                                state.log.upsert(message);
                            }
                        }
                    }
                }
            }

            let wants_pass = self.mark_read_on_arrival
                && state.active
                && state.log.unread_for(&self.local).next().is_some()
                && signed_in_as(self.session.as_deref(), &self.local);
            wants_pass.then(|| state.log.messages().to_vec())
        };

        self.revision.send_modify(|r| *r += 1);

        for payload in arrivals {
            emit_event(&self.events, EngineEvent::NewMessage(payload));
        }
        if let Some(messages) = pending {
            spawn_mark_pass(
                &self.tracker,
                self.conversation.clone(),
                self.local.clone(),
                messages,
            );
        }
    }
}

/// Unbound synchronizers always act; bound ones only for the signed-in user.
fn signed_in_as(session: Option<&dyn SessionProvider>, local: &UserIdentity) -> bool {
    session.map_or(true, |session| session.current_user().as_ref() == Some(local))
}

fn decode_logged(doc: &Document) -> Option<Message> {
    match decode_message(doc) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable message");
            None
        }
    }
}

fn spawn_mark_pass(
    tracker: &ReadStateTracker,
    conversation: ConversationId,
    local: UserIdentity,
    messages: Vec<Message>,
) {
    let tracker = tracker.clone();
    tokio::spawn(async move {
        if let Err(e) = tracker
            .mark_conversation_read(&conversation, &local, Some(&messages))
            .await
        {
            warn!(conversation = %conversation, error = %e, "Mark-read pass failed");
        }
    });
}
