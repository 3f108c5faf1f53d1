//! In-memory message history with delivery receipts.
//!
//! Messages are kept in `(timestamp, append sequence)` order. Once more
//! than `capacity` messages are stored, the oldest are evicted first.

use crate::error::StoreError;
use parley_protocol::{ConversationKey, DeliveryStatus, Message, MessageId, ReadReceipt};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    timestamp: u64,
    seq: u64,
    id: MessageId,
}

#[derive(Debug, Default)]
struct MessageInner {
    order: VecDeque<OrderKey>,
    by_id: HashMap<MessageId, Message>,
    next_seq: u64,
}

/// Append-only message log, bounded by a history cap.
#[derive(Debug)]
pub struct MessageStore {
    inner: RwLock<MessageInner>,
    capacity: usize,
}

impl MessageStore {
    /// Create a store retaining at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(MessageInner::default()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MessageInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MessageInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateMessageId`] if the id is already stored.
    pub fn append(&self, message: Message) -> Result<(), StoreError> {
        let mut inner = self.write();

        if inner.by_id.contains_key(&message.id) {
            return Err(StoreError::DuplicateMessageId(message.id));
        }

        let key = OrderKey {
            timestamp: message.timestamp,
            seq: inner.next_seq,
            id: message.id.clone(),
        };
        inner.next_seq += 1;

        // Usually lands at the back; clock skew between tasks can put it earlier.
        let position = inner.order.partition_point(|k| k <= &key);
        inner.order.insert(position, key);
        inner.by_id.insert(message.id.clone(), message);

        let mut evicted = 0;
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.by_id.remove(&oldest.id);
                evicted += 1;
            }
        }
        if evicted > 0 {
            trace!(evicted, retained = inner.order.len(), "Evicted old messages");
        }

        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Message> {
        self.read().by_id.get(id).cloned()
    }

    /// The most recent `limit` messages of a conversation, oldest first.
    #[must_use]
    pub fn history(&self, conversation: &ConversationKey, limit: usize) -> Vec<Message> {
        let inner = self.read();
        let mut recent: Vec<Message> = inner
            .order
            .iter()
            .rev()
            .filter_map(|key| inner.by_id.get(&key.id))
            .filter(|message| &message.conversation() == conversation)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Move a message from `sent` to `delivered`.
    ///
    /// Returns `true` if the status changed. Messages already delivered or
    /// read are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not stored.
    pub fn mark_delivered(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let message = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::MessageNotFound(id.to_string()))?;

        if message.delivery_status == DeliveryStatus::Sent {
            message.delivery_status = DeliveryStatus::Delivered;
            debug!(message = %id, "Message delivered");
            return Ok(true);
        }
        Ok(false)
    }

    /// Record that `user_id` read a message at `read_at` and raise its status to `read`.
    ///
    /// Returns `true` if this is the user's first receipt for the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not stored.
    pub fn mark_read(&self, id: &str, user_id: &str, read_at: u64) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let message = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::MessageNotFound(id.to_string()))?;

        message.delivery_status = DeliveryStatus::Read;
        if message.is_read_by(user_id) {
            return Ok(false);
        }

        message.read_by.push(ReadReceipt {
            user_id: user_id.to_string(),
            read_at,
        });
        debug!(message = %id, user = %user_id, "Message read");
        Ok(true)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::MessageType;

    fn message(id: &str, group: Option<&str>, timestamp: u64) -> Message {
        Message {
            id: id.into(),
            content: format!("content of {id}"),
            sender_id: "u1".into(),
            sender_username: "alice".into(),
            group_id: group.map(str::to_string),
            timestamp,
            message_type: MessageType::Text,
            delivery_status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            metadata: None,
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = MessageStore::new(10);
        store.append(message("m1", None, 1)).unwrap();
        assert_eq!(
            store.append(message("m1", None, 2)),
            Err(StoreError::DuplicateMessageId("m1".into()))
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().timestamp, 1);
    }

    #[test]
    fn test_history_scoping_and_tail() {
        let store = MessageStore::new(100);
        for i in 0..5 {
            store.append(message(&format!("g{i}"), Some("g"), i)).unwrap();
            store.append(message(&format!("w{i}"), None, i)).unwrap();
        }

        let group = ConversationKey::Group("g".into());
        let history = store.history(&group, 3);
        assert_eq!(ids(&history), vec!["g2", "g3", "g4"]);
        assert_eq!(store.history(&group, 3), history);

        assert_eq!(ids(&store.history(&ConversationKey::Global, 2)), vec!["w3", "w4"]);
        assert_eq!(store.history(&group, 100).len(), 5);
        assert!(store
            .history(&ConversationKey::Group("other".into()), 10)
            .is_empty());
    }

    #[test]
    fn test_ordering_by_timestamp_then_append() {
        let store = MessageStore::new(100);
        store.append(message("late", None, 20)).unwrap();
        store.append(message("early", None, 10)).unwrap();
        store.append(message("tie-a", None, 15)).unwrap();
        store.append(message("tie-b", None, 15)).unwrap();

        assert_eq!(
            ids(&store.history(&ConversationKey::Global, 10)),
            vec!["early", "tie-a", "tie-b", "late"]
        );
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let store = MessageStore::new(3);
        for i in 0..5 {
            store.append(message(&format!("m{i}"), None, i)).unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(store.get("m0").is_none());
        assert!(store.get("m1").is_none());
        assert_eq!(
            ids(&store.history(&ConversationKey::Global, 10)),
            vec!["m2", "m3", "m4"]
        );
    }

    #[test]
    fn test_status_is_monotonic() {
        let store = MessageStore::new(10);
        store.append(message("m1", None, 1)).unwrap();

        assert!(store.mark_delivered("m1").unwrap());
        assert!(!store.mark_delivered("m1").unwrap());
        assert_eq!(store.get("m1").unwrap().delivery_status, DeliveryStatus::Delivered);

        assert!(store.mark_read("m1", "u2", 5).unwrap());
        assert!(!store.mark_delivered("m1").unwrap());
        assert_eq!(store.get("m1").unwrap().delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn test_read_skips_delivered() {
        let store = MessageStore::new(10);
        store.append(message("m1", None, 1)).unwrap();
        store.mark_read("m1", "u2", 5).unwrap();
        assert_eq!(store.get("m1").unwrap().delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn test_read_receipts_deduplicated() {
        let store = MessageStore::new(10);
        store.append(message("m1", None, 1)).unwrap();

        assert!(store.mark_read("m1", "u2", 5).unwrap());
        assert!(!store.mark_read("m1", "u2", 6).unwrap());
        assert!(store.mark_read("m1", "u3", 7).unwrap());

        let read_by = store.get("m1").unwrap().read_by;
        assert_eq!(read_by.len(), 2);
        assert_eq!(read_by[0].user_id, "u2");
        assert_eq!(read_by[0].read_at, 5);
        assert_eq!(read_by[1].user_id, "u3");
    }

    #[test]
    fn test_missing_message() {
        let store = MessageStore::new(10);
        assert_eq!(
            store.mark_delivered("nope"),
            Err(StoreError::MessageNotFound("nope".into()))
        );
        assert!(store.mark_read("nope", "u1", 0).is_err());
    }
}
