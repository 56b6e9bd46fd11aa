//! Fixtures shared by the engine's tests.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use atlerts_shared::{resolve_conversation_id, Message, MessageId, UserIdentity};
use atlerts_store::{DocumentPath, Fields, MemoryStore};

pub fn user(name: &str) -> UserIdentity {
    UserIdentity::from(name)
}

pub fn fields(body: Value) -> Fields {
    body.as_object().cloned().unwrap_or_default()
}

/// An unread message from `from` to `to`, sent `at_ms` after the epoch.
pub fn message(id: &str, from: &str, to: &str, at_ms: i64) -> Message {
    let conversation = resolve_conversation_id(&user(from), Some(&user(to))).unwrap();
    Message {
        id: MessageId(id.to_string()),
        conversation_id: conversation,
        from_id: user(from),
        to_id: user(to),
        text: format!("message {id}"),
        attachment_url: None,
        sent_at: Utc.timestamp_millis_opt(at_ms).unwrap(),
        is_read: false,
        legacy_author: false,
    }
}

/// Put a message straight into the store, bypassing the write counters.
pub fn seed_message(store: &MemoryStore, id: &str, from: &str, to: &str, at_ms: i64) -> DocumentPath {
    let conversation = resolve_conversation_id(&user(from), Some(&user(to))).unwrap();
    let path = DocumentPath::new(format!("{}/{id}", conversation.messages_path())).unwrap();
    store.insert(
        path.clone(),
        fields(json!({
            "conversationId": conversation.as_str(),
            "fromId": from,
            "toId": to,
            "text": format!("message {id}"),
            "sentAt": at_ms,
            "isRead": false
        })),
    );
    path
}

pub fn seed_user(store: &MemoryStore, uid: &str, name: &str) {
    store.insert(
        DocumentPath::new(format!("users/{uid}")).unwrap(),
        fields(json!({ "uid": uid, "name": name, "role": "staff" })),
    );
}

/// Let every spawned task run until the system is idle.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Wait until `condition` holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached before timeout");
}
