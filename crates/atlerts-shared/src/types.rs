use serde::{Deserialize, Serialize};

use crate::constants::{CONVERSATIONS_COLLECTION, MESSAGES_COLLECTION};

/// Account identity issued by the session provider. Opaque, stable for the
/// lifetime of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of a conversation's message stream. Built by
/// [`resolve_conversation_id`](crate::identity::resolve_conversation_id).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap an id that was already derived elsewhere (e.g. read back from a
    /// document path).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collection holding this conversation's messages.
    pub fn messages_path(&self) -> String {
        format!("{CONVERSATIONS_COLLECTION}/{}/{MESSAGES_COLLECTION}", self.0)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned message id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned broadcast id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BroadcastId(pub String);

impl BroadcastId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_path() {
        let id = ConversationId::from_raw("alice_bob");
        assert_eq!(id.messages_path(), "conversations/alice_bob/messages");
    }

    #[test]
    fn test_identity_serializes_as_plain_string() {
        let user = UserIdentity::from("alice");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");
    }
}
