//! Event types for the Parley protocol.
//!
//! Clients send [`ClientEnvelope`]s naming an event, its payload and an
//! optional acknowledgment id. The server answers with [`ServerFrame`]s:
//! either a pushed [`ServerEvent`] or the acknowledgment of a request.

use crate::codec::ProtocolError;
use crate::models::{Group, GroupId, Message, MessageId, MessageType, TypingIndicator, User, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound event names.
pub mod names {
    pub const AUTH_LOGIN: &str = "auth:login";
    pub const MESSAGE_SEND: &str = "message:send";
    pub const MESSAGE_DELIVERED: &str = "message:delivered";
    pub const MESSAGE_READ: &str = "message:read";
    pub const MESSAGE_HISTORY: &str = "message:history";
    pub const GROUP_CREATE: &str = "group:create";
    pub const GROUP_JOIN: &str = "group:join";
    pub const GROUP_LEAVE: &str = "group:leave";
    pub const GROUP_LIST: &str = "group:list";
    pub const TYPING_START: &str = "typing:start";
    pub const TYPING_STOP: &str = "typing:stop";
    pub const STATUS_GET_ONLINE: &str = "status:get_online";
}

/// Raw inbound envelope as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Event name, e.g. `message:send`.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Request id to acknowledge, if the client wants a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl ClientEnvelope {
    /// Build an envelope from a typed event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new(event: &ClientEvent, ack: Option<u64>) -> Result<Self, ProtocolError> {
        let (name, data) = event.to_parts()?;
        Ok(Self {
            event: name.to_string(),
            data,
            ack,
        })
    }

    /// Parse the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown event names or payloads of the wrong shape.
    pub fn parse(&self) -> Result<ClientEvent, ProtocolError> {
        ClientEvent::from_parts(&self.event, self.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

/// A typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Login(LoginRequest),
    SendMessage(SendMessageRequest),
    MessageDelivered(MessageRef),
    MessageRead(MessageRef),
    History(HistoryRequest),
    CreateGroup(CreateGroupRequest),
    JoinGroup(GroupRef),
    LeaveGroup(GroupRef),
    ListGroups,
    TypingStart(TypingRequest),
    TypingStop(TypingRequest),
    GetOnline,
}

impl ClientEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => names::AUTH_LOGIN,
            Self::SendMessage(_) => names::MESSAGE_SEND,
            Self::MessageDelivered(_) => names::MESSAGE_DELIVERED,
            Self::MessageRead(_) => names::MESSAGE_READ,
            Self::History(_) => names::MESSAGE_HISTORY,
            Self::CreateGroup(_) => names::GROUP_CREATE,
            Self::JoinGroup(_) => names::GROUP_JOIN,
            Self::LeaveGroup(_) => names::GROUP_LEAVE,
            Self::ListGroups => names::GROUP_LIST,
            Self::TypingStart(_) => names::TYPING_START,
            Self::TypingStop(_) => names::TYPING_STOP,
            Self::GetOnline => names::STATUS_GET_ONLINE,
        }
    }

    /// Decode an event from its name and JSON payload.
    ///
    /// A missing payload is treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names or malformed payloads.
    pub fn from_parts(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let parsed = match event {
            names::AUTH_LOGIN => Self::Login(payload(event, data)?),
            names::MESSAGE_SEND => Self::SendMessage(payload(event, data)?),
            names::MESSAGE_DELIVERED => Self::MessageDelivered(payload(event, data)?),
            names::MESSAGE_READ => Self::MessageRead(payload(event, data)?),
            names::MESSAGE_HISTORY => Self::History(payload(event, data)?),
            names::GROUP_CREATE => Self::CreateGroup(payload(event, data)?),
            names::GROUP_JOIN => Self::JoinGroup(payload(event, data)?),
            names::GROUP_LEAVE => Self::LeaveGroup(payload(event, data)?),
            names::GROUP_LIST => Self::ListGroups,
            names::TYPING_START => Self::TypingStart(payload(event, data)?),
            names::TYPING_STOP => Self::TypingStop(payload(event, data)?),
            names::STATUS_GET_ONLINE => Self::GetOnline,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };

        Ok(parsed)
    }

    /// Split the event into its wire name and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_parts(&self) -> Result<(&'static str, Value), ProtocolError> {
        let data = match self {
            Self::Login(p) => serde_json::to_value(p),
            Self::SendMessage(p) => serde_json::to_value(p),
            Self::MessageDelivered(p) | Self::MessageRead(p) => serde_json::to_value(p),
            Self::History(p) => serde_json::to_value(p),
            Self::CreateGroup(p) => serde_json::to_value(p),
            Self::JoinGroup(p) | Self::LeaveGroup(p) => serde_json::to_value(p),
            Self::TypingStart(p) | Self::TypingStop(p) => serde_json::to_value(p),
            Self::ListGroups | Self::GetOnline => Ok(Value::Object(Map::new())),
        }?;
        Ok((self.name(), data))
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Handshake info pushed right after a connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub connection_id: String,
    pub protocol_version: String,
    pub auth_required: bool,
}

/// A delivery or read receipt pushed to a message's sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: MessageId,
    pub user_id: UserId,
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "session:connected")]
    Connected(SessionInfo),

    #[serde(rename = "status:online")]
    UserOnline { user_id: UserId },

    #[serde(rename = "status:offline")]
    UserOffline { user_id: UserId },

    /// Full snapshot of the online set.
    #[serde(rename = "status:update")]
    PresenceUpdate(Vec<User>),

    #[serde(rename = "message:receive")]
    MessageReceived(Message),

    #[serde(rename = "message:history")]
    History(Vec<Message>),

    #[serde(rename = "message:delivered")]
    Delivered(Receipt),

    #[serde(rename = "message:read")]
    Read(Receipt),

    #[serde(rename = "typing:indicator")]
    Typing(TypingIndicator),

    #[serde(rename = "group:joined")]
    GroupJoined(Group),

    #[serde(rename = "group:member_joined")]
    MemberJoined { group_id: GroupId, user: User },

    #[serde(rename = "group:member_left")]
    MemberLeft { group_id: GroupId, user_id: UserId },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "session:connected",
            Self::UserOnline { .. } => "status:online",
            Self::UserOffline { .. } => "status:offline",
            Self::PresenceUpdate(_) => "status:update",
            Self::MessageReceived(_) => "message:receive",
            Self::History(_) => "message:history",
            Self::Delivered(_) => "message:delivered",
            Self::Read(_) => "message:read",
            Self::Typing(_) => "typing:indicator",
            Self::GroupJoined(_) => "group:joined",
            Self::MemberJoined { .. } => "group:member_joined",
            Self::MemberLeft { .. } => "group:member_left",
            Self::Error { .. } => "error",
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Body of a request acknowledgment.
///
/// Serializes as `{"success": true, ...payload}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckBody {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl AckBody {
    /// A successful acknowledgment.
    ///
    /// Object payloads are merged into the body; anything else lands
    /// under `data`.
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            success: true,
            error: None,
            payload,
        }
    }

    /// A failed acknowledgment.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            payload: Map::new(),
        }
    }

    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// A frame sent from the server to one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Reply to the request carrying the same `ack` id.
    Ack { ack: u64, data: AckBody },
    /// A pushed event.
    Event(ServerEvent),
}

impl ServerFrame {
    #[must_use]
    pub fn ack(id: u64, body: AckBody) -> Self {
        Self::Ack { ack: id, data: body }
    }
}

impl From<ServerEvent> for ServerFrame {
    fn from(event: ServerEvent) -> Self {
        Self::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_send_message() {
        let envelope: ClientEnvelope = serde_json::from_value(json!({
            "event": "message:send",
            "data": {"content": "hello", "groupId": "g1"},
            "ack": 7
        }))
        .unwrap();

        assert_eq!(envelope.ack, Some(7));
        match envelope.parse().unwrap() {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.content, "hello");
                assert_eq!(req.group_id.as_deref(), Some("g1"));
                assert_eq!(req.message_type, MessageType::Text);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_payload() {
        let event = ClientEvent::from_parts("status:get_online", Value::Null).unwrap();
        assert_eq!(event, ClientEvent::GetOnline);

        let event = ClientEvent::from_parts("typing:start", Value::Null).unwrap();
        assert_eq!(event, ClientEvent::TypingStart(TypingRequest::default()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ClientEvent::from_parts("nope", Value::Null),
            Err(ProtocolError::UnknownEvent(_))
        ));
        assert!(matches!(
            ClientEvent::from_parts("group:join", json!({"wrong": 1})),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::MemberLeft {
            group_id: "g1".into(),
            user_id: "u1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "group:member_left");
        assert_eq!(value["data"]["groupId"], "g1");
        assert_eq!(event.name(), "group:member_left");
    }

    #[test]
    fn test_ack_body_shape() {
        let ok = ServerFrame::ack(3, AckBody::ok(json!({"users": []})));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value, json!({"ack": 3, "data": {"success": true, "users": []}}));

        let err = serde_json::to_value(AckBody::err("Rate limit exceeded")).unwrap();
        assert_eq!(err, json!({"success": false, "error": "Rate limit exceeded"}));
    }

    #[test]
    fn test_server_frame_decodes_both_shapes() {
        let ack: ServerFrame =
            serde_json::from_value(json!({"ack": 1, "data": {"success": true}})).unwrap();
        assert!(matches!(ack, ServerFrame::Ack { ack: 1, .. }));

        let event: ServerFrame = serde_json::from_value(json!({
            "event": "status:online",
            "data": {"userId": "u1"}
        }))
        .unwrap();
        assert_eq!(
            event,
            ServerFrame::Event(ServerEvent::UserOnline {
                user_id: "u1".into()
            })
        );
    }
}
