//! Entity types shared by the engine and its clients.
//!
//! Everything here crosses the wire, so field names serialize in camelCase.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A user identifier.
pub type UserId = String;

/// A group identifier.
pub type GroupId = String;

/// A message identifier.
pub type MessageId = String;

/// Sender id used for server-authored messages.
pub const SYSTEM_SENDER: &str = "system";

/// Sender name used for server-authored messages.
pub const SYSTEM_USERNAME: &str = "System";

/// Sentinel naming the global conversation.
pub const GLOBAL_CONVERSATION: &str = "global";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    /// Set when the user's connection goes away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

impl User {
    /// Create an offline user.
    #[must_use]
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: None,
            is_online: false,
            last_seen: None,
        }
    }

    /// Attach an avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar: Option<String>) -> Self {
        self.avatar = avatar;
        self
    }
}

/// Scope of a message or typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    /// The conversation every connection sees.
    Global,
    /// A group conversation.
    Group(GroupId),
}

impl ConversationKey {
    /// Build a key from an optional group id.
    #[must_use]
    pub fn from_group(group_id: Option<&str>) -> Self {
        match group_id {
            Some(id) => Self::Group(id.to_string()),
            None => Self::Global,
        }
    }

    /// The group id, if this is a group conversation.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Group(id) => Some(id),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(GLOBAL_CONVERSATION),
            Self::Group(id) => f.write_str(id),
        }
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Delivery progression of a message.
///
/// Ordering follows the progression, so `Sent < Delivered < Read`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// One user's read receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: u64,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub sender_username: String,
    /// Absent for the global conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub timestamp: u64,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    /// Opaque client tagging (file name, mime type, dimensions...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// The conversation this message belongs to.
    #[must_use]
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::from_group(self.group_id.as_deref())
    }

    /// Whether the server authored this message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER
    }

    /// Whether `user_id` already has a read receipt.
    #[must_use]
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

/// A named conversation with explicit membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: UserId,
    pub created_at: u64,
    pub members: BTreeSet<UserId>,
    /// Always a subset of `members`.
    pub admins: BTreeSet<UserId>,
    #[serde(default)]
    pub is_private: bool,
}

impl Group {
    #[must_use]
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    #[must_use]
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }
}

/// Typing state broadcast to other participants of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub is_typing: bool,
    pub timestamp: u64,
}

impl TypingIndicator {
    /// The conversation this indicator belongs to.
    #[must_use]
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::from_group(self.group_id.as_deref())
    }

    /// The same indicator flipped to "not typing", stamped now.
    #[must_use]
    pub fn stopped(&self) -> Self {
        Self {
            is_typing: false,
            timestamp: now_millis(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_ordering() {
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    }

    #[test]
    fn test_conversation_key() {
        assert_eq!(ConversationKey::from_group(None), ConversationKey::Global);
        assert_eq!(ConversationKey::Global.to_string(), "global");

        let key = ConversationKey::from_group(Some("g1"));
        assert_eq!(key.group_id(), Some("g1"));
        assert_eq!(key.to_string(), "g1");
    }

    #[test]
    fn test_message_wire_names() {
        let message = Message {
            id: "m1".into(),
            content: "hi".into(),
            sender_id: "u1".into(),
            sender_username: "alice".into(),
            group_id: None,
            timestamp: 1,
            message_type: MessageType::Text,
            delivery_status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            metadata: None,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["deliveryStatus"], "sent");
        assert_eq!(value["messageType"], "text");
        assert!(value.get("groupId").is_none());
    }

    #[test]
    fn test_typing_stopped() {
        let typing = TypingIndicator {
            user_id: "u1".into(),
            username: "alice".into(),
            group_id: Some("g1".into()),
            is_typing: true,
            timestamp: 0,
        };

        let stopped = typing.stopped();
        assert!(!stopped.is_typing);
        assert_eq!(stopped.group_id.as_deref(), Some("g1"));
    }
}
