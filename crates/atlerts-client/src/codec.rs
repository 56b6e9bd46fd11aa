//! Mapping between store documents and engine models.
//!
//! Older clients wrote messages with `senderId`, `timestamp` and `imageURL`.
//! Those names are folded into the canonical ones on read. Writes only ever
//! produce canonical fields.

use serde_json::Value;

use atlerts_shared::constants::{
    BROADCASTS_COLLECTION, FIELD_ATTACHMENT_URL, FIELD_CONVERSATION_ID, FIELD_FROM_ID,
    FIELD_SENT_AT, LEGACY_FIELD_IMAGE_URL, LEGACY_FIELD_IMAGE_URL_LOWER, LEGACY_FIELD_SENDER_ID,
    LEGACY_FIELD_TIMESTAMP, REPLIES_COLLECTION, USERS_COLLECTION,
};
use atlerts_shared::{
    BroadcastId, BroadcastMessage, BroadcastReply, ConversationId, Message, MessageId, UserProfile,
};
use atlerts_store::{CollectionPath, Document, DocumentPath, Fields, StoreError};

use crate::error::{ClientError, Result};

fn decode_error(doc: &Document, err: StoreError) -> ClientError {
    ClientError::Decode {
        path: doc.path.to_string(),
        reason: err.to_string(),
    }
}

/// Move `legacy` to `canonical` when only the legacy name is present.
/// Returns whether a rename happened.
fn fold_legacy(fields: &mut Fields, legacy: &str, canonical: &str) -> bool {
    if fields.contains_key(canonical) {
        fields.remove(legacy);
        return false;
    }
    match fields.remove(legacy) {
        Some(value) => {
            fields.insert(canonical.to_string(), value);
            true
        }
        None => false,
    }
}

pub fn decode_message(doc: &Document) -> Result<Message> {
    let mut fields = doc.fields.clone();

    let legacy_author = fold_legacy(&mut fields, LEGACY_FIELD_SENDER_ID, FIELD_FROM_ID);
    fold_legacy(&mut fields, LEGACY_FIELD_TIMESTAMP, FIELD_SENT_AT);
    fold_legacy(&mut fields, LEGACY_FIELD_IMAGE_URL, FIELD_ATTACHMENT_URL);
    fold_legacy(&mut fields, LEGACY_FIELD_IMAGE_URL_LOWER, FIELD_ATTACHMENT_URL);

    // conversations/{conversationId}/messages/{messageId}
    if !fields.contains_key(FIELD_CONVERSATION_ID) {
        if let Some(conversation) = doc.path.segments().nth(1) {
            fields.insert(
                FIELD_CONVERSATION_ID.to_string(),
                Value::String(conversation.to_string()),
            );
        }
    }

    let mut message: Message = Document::new(doc.path.clone(), fields)
        .decode()
        .map_err(|e| decode_error(doc, e))?;
    message.legacy_author = legacy_author;
    Ok(message)
}

pub fn decode_broadcast(doc: &Document) -> Result<BroadcastMessage> {
    let mut fields = doc.fields.clone();
    fold_legacy(&mut fields, LEGACY_FIELD_TIMESTAMP, FIELD_SENT_AT);
    fold_legacy(&mut fields, LEGACY_FIELD_IMAGE_URL, FIELD_ATTACHMENT_URL);
    fold_legacy(&mut fields, LEGACY_FIELD_IMAGE_URL_LOWER, FIELD_ATTACHMENT_URL);

    Document::new(doc.path.clone(), fields)
        .decode()
        .map_err(|e| decode_error(doc, e))
}

pub fn decode_reply(doc: &Document) -> Result<BroadcastReply> {
    doc.decode().map_err(|e| decode_error(doc, e))
}

/// Profiles are keyed by uid; the path is authoritative when the body has
/// no `uid`.
pub fn decode_profile(doc: &Document) -> Result<UserProfile> {
    let mut profile: UserProfile = doc.decode().map_err(|e| decode_error(doc, e))?;
    if profile.uid.is_empty() {
        profile.uid = doc.id().into();
    }
    Ok(profile)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub fn messages_collection(conversation: &ConversationId) -> Result<CollectionPath> {
    Ok(CollectionPath::new(conversation.messages_path())?)
}

pub fn message_path(conversation: &ConversationId, id: &MessageId) -> Result<DocumentPath> {
    Ok(messages_collection(conversation)?.doc(id.as_str()))
}

pub fn broadcasts_collection() -> Result<CollectionPath> {
    Ok(CollectionPath::new(BROADCASTS_COLLECTION)?)
}

pub fn broadcast_path(id: &BroadcastId) -> Result<DocumentPath> {
    Ok(broadcasts_collection()?.doc(id.as_str()))
}

pub fn replies_collection(id: &BroadcastId) -> Result<CollectionPath> {
    Ok(broadcast_path(id)?.collection(REPLIES_COLLECTION))
}

pub fn users_collection() -> Result<CollectionPath> {
    Ok(CollectionPath::new(USERS_COLLECTION)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str, body: Value) -> Document {
        Document::new(
            DocumentPath::new(path).unwrap(),
            body.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn test_canonical_message() {
        let message = decode_message(&doc(
            "conversations/alice_bob/messages/m1",
            json!({
                "conversationId": "alice_bob",
                "fromId": "alice",
                "toId": "bob",
                "text": "hi",
                "sentAt": 1_700_000_000_000i64,
                "isRead": false
            }),
        ))
        .unwrap();

        assert_eq!(message.id.as_str(), "m1");
        assert_eq!(message.from_id.as_str(), "alice");
        assert_eq!(message.sent_at.timestamp_millis(), 1_700_000_000_000);
        assert!(!message.legacy_author);
        assert!(!message.is_read);
    }

    #[test]
    fn test_legacy_fields_are_folded() {
        let message = decode_message(&doc(
            "conversations/alice_bob/messages/m2",
            json!({
                "senderId": "bob",
                "toId": "alice",
                "text": "",
                "timestamp": 1_700_000_000_500i64,
                "imageURL": "https://blobs/cat.jpg"
            }),
        ))
        .unwrap();

        assert_eq!(message.from_id.as_str(), "bob");
        assert_eq!(message.conversation_id.as_str(), "alice_bob");
        assert_eq!(message.attachment_url.as_deref(), Some("https://blobs/cat.jpg"));
        assert!(message.legacy_author);
        assert!(!message.is_read);
    }

    #[test]
    fn test_canonical_author_wins_over_legacy() {
        let message = decode_message(&doc(
            "conversations/alice_bob/messages/m3",
            json!({
                "fromId": "alice",
                "senderId": "bob",
                "toId": "bob",
                "text": "hi",
                "sentAt": 1
            }),
        ))
        .unwrap();
        assert_eq!(message.from_id.as_str(), "alice");
        assert!(!message.legacy_author);
    }

    #[test]
    fn test_missing_author_is_a_decode_error() {
        let err = decode_message(&doc(
            "conversations/alice_bob/messages/m4",
            json!({ "toId": "bob", "text": "hi", "sentAt": 1 }),
        ))
        .unwrap_err();
        assert!(matches!(err, ClientError::Decode { ref path, .. } if path.ends_with("/m4")));
    }

    #[test]
    fn test_profile_uid_from_path() {
        let profile = decode_profile(&doc("users/carol", json!({ "name": "Carol" }))).unwrap();
        assert_eq!(profile.uid.as_str(), "carol");
        assert_eq!(profile.name, "Carol");
    }

    #[test]
    fn test_paths() {
        let conversation = ConversationId::from_raw("alice_bob");
        let path = message_path(&conversation, &MessageId("m1".into())).unwrap();
        assert_eq!(path.as_str(), "conversations/alice_bob/messages/m1");

        let replies = replies_collection(&BroadcastId("b1".into())).unwrap();
        assert_eq!(replies.as_str(), "broadcasts/b1/replies");
    }
}
