//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat engine.
//!
//! This crate defines the entities exchanged between clients and the
//! server, the inbound and outbound event envelopes, and their codecs.
//!
//! ## Event Families
//!
//! - `auth:*` - Token login
//! - `message:*` - Sending, history and delivery/read receipts
//! - `group:*` - Group creation and membership
//! - `typing:*` - Typing indicators
//! - `status:*` - Presence
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientEvent};
//!
//! let envelope = codec::decode_text(
//!     r#"{"event":"message:send","data":{"content":"Hello"},"ack":1}"#,
//! ).unwrap();
//!
//! assert!(matches!(envelope.parse().unwrap(), ClientEvent::SendMessage(_)));
//! ```

pub mod codec;
pub mod events;
pub mod models;
pub mod version;

pub use codec::{Encoding, ProtocolError};
pub use events::{
    AckBody, ClientEnvelope, ClientEvent, CreateGroupRequest, GroupRef, HistoryRequest,
    LoginRequest, MessageRef, Receipt, SendMessageRequest, ServerEvent, ServerFrame,
    SessionInfo, TypingRequest,
};
pub use models::{
    now_millis, ConversationKey, DeliveryStatus, Group, GroupId, Message, MessageId,
    MessageType, ReadReceipt, TypingIndicator, User, UserId, GLOBAL_CONVERSATION,
    SYSTEM_SENDER, SYSTEM_USERNAME,
};
pub use version::{Version, PROTOCOL_VERSION};
