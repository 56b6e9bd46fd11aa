//! Document models as stored in the remote document store.
//!
//! Field names are camelCase on the wire. Ids are assigned by the store and
//! live in the document path, so they are never serialized back into the
//! document body.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BroadcastId, ConversationId, MessageId, UserIdentity};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned id (taken from the document path).
    #[serde(default, skip_serializing)]
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Author. Older documents call this `senderId`.
    pub from_id: UserIdentity,
    pub to_id: UserIdentity,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
    /// Monotonic: only ever goes from `false` to `true`.
    #[serde(default)]
    pub is_read: bool,
    /// Set when the document only carried the legacy author field, so the
    /// next write to it should also fill in `fromId`.
    #[serde(skip)]
    pub legacy_author: bool,
}

impl Message {
    /// Build an unsent message. The id is filled in by the store.
    pub fn outgoing(
        conversation_id: ConversationId,
        from_id: UserIdentity,
        to_id: UserIdentity,
        text: String,
        attachment_url: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::default(),
            conversation_id,
            from_id,
            to_id,
            text,
            attachment_url,
            sent_at: Utc::now(),
            is_read: false,
            legacy_author: false,
        }
    }

    /// Authored by someone other than `viewer` and not yet read.
    pub fn is_unread_for(&self, viewer: &UserIdentity) -> bool {
        !self.is_read && self.from_id != *viewer
    }

    /// Position in a conversation log: send time, then id for ties.
    pub fn order_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.sent_at, &self.id)
    }
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// A one-to-many announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(default, skip_serializing)]
    pub id: BroadcastId,
    pub text: String,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
    /// Everyone who has seen the broadcast, in the order their receipts
    /// landed. Grows by set union only.
    #[serde(default)]
    pub read_by: Vec<UserIdentity>,
}

impl BroadcastMessage {
    pub fn was_read_by(&self, user: &UserIdentity) -> bool {
        self.read_by.contains(user)
    }
}

/// A reply to a broadcast, stored under the broadcast's `replies` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReply {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub text: String,
    pub sender_id: UserIdentity,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

/// Directory entry for a staff member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: UserIdentity,
    #[serde(default = "default_sender_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(
        default,
        alias = "profileImageURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<String>,
}

fn default_sender_name() -> String {
    "Unknown user".to_string()
}

fn default_role() -> String {
    "client".to_string()
}
