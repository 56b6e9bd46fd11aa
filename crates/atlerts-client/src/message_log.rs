//! Time-ordered cache of one conversation.

use atlerts_shared::{Message, MessageId, UserIdentity};

/// Messages sorted by `(sent_at, id)`, unique by id.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole log with a snapshot.
    pub fn reset(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.clear();
        for message in messages {
            self.upsert(message);
        }
    }

    /// Insert a message at its position, or replace the cached copy when the
    /// id is already present. A cached read flag is never cleared.
    pub fn upsert(&mut self, mut message: Message) {
        if let Some(existing) = self.position(&message.id) {
            message.is_read |= self.messages[existing].is_read;
            if self.messages[existing].order_key() == message.order_key() {
                self.messages[existing] = message;
                return;
            }
            self.messages.remove(existing);
        }
        let at = self
            .messages
            .partition_point(|m| m.order_key() < message.order_key());
        self.messages.insert(at, message);
    }

    /// No-op when the id is not cached.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        self.position(id).map(|at| self.messages.remove(at))
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|at| &self.messages[at])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn unread_for<'a>(
        &'a self,
        viewer: &'a UserIdentity,
    ) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages.iter().filter(move |m| m.is_unread_for(viewer))
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message;

    fn ids(log: &MessageLog) -> Vec<&str> {
        log.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_arrivals_are_sorted() {
        let mut log = MessageLog::new();
        log.upsert(message("m3", "alice", "bob", 30));
        log.upsert(message("m1", "alice", "bob", 10));
        log.upsert(message("m2", "bob", "alice", 20));
        assert_eq!(ids(&log), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_ties_break_on_id() {
        let mut log = MessageLog::new();
        log.upsert(message("b", "alice", "bob", 10));
        log.upsert(message("a", "alice", "bob", 10));
        assert_eq!(ids(&log), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_add_acts_as_modify() {
        let mut log = MessageLog::new();
        log.upsert(message("m1", "bob", "alice", 10));

        let mut read = message("m1", "bob", "alice", 10);
        read.is_read = true;
        log.upsert(read);

        assert_eq!(log.len(), 1);
        assert!(log.get(&MessageId("m1".into())).unwrap().is_read);
    }

    #[test]
    fn test_stale_unread_copy_keeps_read_flag() {
        let mut log = MessageLog::new();
        let mut read = message("m1", "bob", "alice", 10);
        read.is_read = true;
        log.upsert(read);

        log.upsert(message("m1", "bob", "alice", 10));
        assert!(log.get(&MessageId("m1".into())).unwrap().is_read);

        // Also when the stale copy lands at a different position.
        log.upsert(message("m1", "bob", "alice", 40));
        assert!(log.get(&MessageId("m1".into())).unwrap().is_read);
    }

    #[test]
    fn test_modify_with_new_timestamp_moves_entry() {
        let mut log = MessageLog::new();
        log.upsert(message("m1", "alice", "bob", 10));
        log.upsert(message("m2", "alice", "bob", 20));
        log.upsert(message("m1", "alice", "bob", 30));
        assert_eq!(ids(&log), vec!["m2", "m1"]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut log = MessageLog::new();
        log.upsert(message("m1", "alice", "bob", 10));
        assert!(log.remove(&MessageId("zz".into())).is_none());
        assert_eq!(log.len(), 1);
        assert!(log.remove(&MessageId("m1".into())).is_some());
        assert!(log.is_empty());
    }

    #[test]
    fn test_unread_for_viewer() {
        let mut log = MessageLog::new();
        log.upsert(message("m1", "bob", "alice", 10));
        log.upsert(message("m2", "alice", "bob", 20));
        let alice = UserIdentity::from("alice");
        let unread: Vec<&str> = log.unread_for(&alice).map(|m| m.id.as_str()).collect();
        assert_eq!(unread, vec!["m1"]);
    }

    #[test]
    fn test_unread_for_outlives_temporary_viewer() {
        let mut log = MessageLog::new();
        log.upsert(message("m1", "bob", "alice", 10));
        let unread = {
            let viewer = UserIdentity::from("alice");
            log.unread_for(&viewer).count()
        };
        assert_eq!(unread, 1);
        assert_eq!(log.unread_for(&UserIdentity::from("bob")).count(), 0);
    }
}
