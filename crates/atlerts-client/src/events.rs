use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_NEW_MESSAGE: &str = "new-message";
pub const EVENT_NEW_BROADCAST: &str = "new-broadcast";
pub const EVENT_UNREAD_CHANGED: &str = "unread-changed";

const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub conversation_id: String,
    pub message_id: String,
    pub sender: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewBroadcastPayload {
    pub broadcast_id: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadChangedPayload {
    pub count: usize,
}

/// Notifications for the host UI.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum EngineEvent {
    NewMessage(NewMessagePayload),
    NewBroadcast(NewBroadcastPayload),
    UnreadChanged(UnreadChangedPayload),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::NewBroadcast(_) => EVENT_NEW_BROADCAST,
            Self::UnreadChanged(_) => EVENT_UNREAD_CHANGED,
        }
    }
}

/// Fan-out of [`EngineEvent`]s to any number of listeners. Slow listeners
/// lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn emit_event(bus: &EventBus, event: EngineEvent) {
    let name = event.name();
    if bus.tx.send(event).is_err() {
        tracing::trace!(event = name, "No listener for event");
    }
}
