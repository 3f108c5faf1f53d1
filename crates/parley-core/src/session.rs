//! Session coordination.
//!
//! [`SessionCoordinator`] is the only writer of the presence registry, the
//! group store, the message store, the typing coordinator and the rate
//! limiter. The transport calls [`connect`](SessionCoordinator::connect),
//! [`handle_envelope`](SessionCoordinator::handle_envelope) and
//! [`disconnect`](SessionCoordinator::disconnect); the coordinator answers
//! with acknowledgments and fans events out through the [`Transport`].
//!
//! Two coarse gates keep multi-store sequences consistent:
//!
//! - the presence gate serializes register/unregister with the presence
//!   broadcast that follows, so `status:update` snapshots go out in
//!   registry order;
//! - the conversation gate covers membership check, append and fan-out of
//!   group-scoped operations, so a member who leaves never receives a
//!   message admitted after the leave and fan-out order matches history.
//!
//! The gates are never held together and never across an `.await`.

use crate::auth::Authenticator;
use crate::config::EngineConfig;
use crate::error::{SessionError, StoreError, INTERNAL_ERROR};
use crate::group::GroupStore;
use crate::message::MessageStore;
use crate::presence::{ConnectionPhase, PresenceRegistry};
use crate::rate_limit::RateLimiter;
use crate::typing::TypingCoordinator;
use crate::validate::{DefaultValidator, PayloadValidator};
use futures_util::FutureExt;
use parley_protocol::{
    now_millis, AckBody, ClientEnvelope, ClientEvent, ConversationKey, CreateGroupRequest,
    DeliveryStatus, GroupRef, HistoryRequest, LoginRequest, Message, MessageRef, MessageType,
    Receipt, SendMessageRequest, ServerEvent, SessionInfo, TypingIndicator, TypingRequest, User,
    PROTOCOL_VERSION, SYSTEM_SENDER, SYSTEM_USERNAME,
};
use parley_transport::{group_room, user_room, ConnectionId, Target, Transport};
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

/// Identity hints supplied when a socket connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub connections: usize,
    pub online_users: usize,
    pub groups: usize,
    pub messages: usize,
    pub typing: usize,
}

/// The chat engine.
pub struct SessionCoordinator {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    authenticator: Option<Arc<dyn Authenticator>>,
    validator: Box<dyn PayloadValidator>,
    presence: PresenceRegistry,
    groups: GroupStore,
    messages: MessageStore,
    typing: TypingCoordinator,
    rate_limiter: RateLimiter,
    presence_gate: Mutex<()>,
    conversation_gate: Mutex<()>,
}

impl SessionCoordinator {
    /// Create a coordinator fanning out through `transport`.
    #[must_use]
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        info!(
            authentication = config.enable_authentication,
            groups = config.enable_groups,
            typing = config.enable_typing_indicator,
            rate_limiting = config.rate_limiting.enabled,
            "Creating session coordinator"
        );
        Self {
            validator: Box::new(DefaultValidator::new(config.max_content_length)),
            presence: PresenceRegistry::new(),
            groups: GroupStore::new(),
            messages: MessageStore::new(config.max_message_history),
            typing: TypingCoordinator::new(config.typing_timeout()),
            rate_limiter: RateLimiter::from_config(&config.rate_limiting),
            presence_gate: Mutex::new(()),
            conversation_gate: Mutex::new(()),
            authenticator: None,
            transport,
            config,
        }
    }

    /// Use `authenticator` for `auth:login`.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Replace the default payload validator.
    #[must_use]
    pub fn with_validator(mut self, validator: impl PayloadValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    #[must_use]
    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    #[must_use]
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    #[must_use]
    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            connections: self.presence.connection_count(),
            online_users: self.presence.online_count(),
            groups: self.groups.len(),
            messages: self.messages.len(),
            typing: self.typing.len(),
        }
    }

    // Connection lifecycle

    /// Admit a new connection.
    ///
    /// Without authentication the connection becomes active right away as
    /// an anonymous user; otherwise it waits for `auth:login`.
    pub fn connect(&self, connection: &ConnectionId, handshake: Handshake) -> SessionInfo {
        self.presence.attach(connection);

        let info = SessionInfo {
            connection_id: connection.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            auth_required: self.config.enable_authentication,
        };
        self.transport.emit(
            &Target::Connection(connection.clone()),
            &ServerEvent::Connected(info.clone()),
        );
        debug!(connection = %connection, auth_required = info.auth_required, "Connection admitted");

        if !self.config.enable_authentication {
            let user = anonymous_user(handshake);
            self.activate(connection, user);
        }

        info
    }

    /// Tear down everything tied to a connection.
    ///
    /// The user goes offline (and its typing indicators stop) only if this
    /// connection still holds the user's binding.
    pub fn disconnect(&self, connection: &ConnectionId) {
        let state = self.presence.detach(connection);
        self.rate_limiter.release(connection);
        self.transport.leave_all(connection);

        let Some(user_id) = state.and_then(|s| s.user_id) else {
            debug!(connection = %connection, "Unauthenticated connection closed");
            return;
        };

        let offline = {
            let _gate = self.lock_presence();
            let offline = self.presence.unregister(&user_id, connection);
            if offline.is_some() && self.config.enable_online_status {
                self.transport.emit(
                    &Target::All,
                    &ServerEvent::UserOffline {
                        user_id: user_id.clone(),
                    },
                );
                self.broadcast_presence();
            }
            offline
        };

        if offline.is_none() {
            debug!(connection = %connection, user = %user_id, "Superseded connection closed");
            return;
        }

        for indicator in self.typing.stop_all(&user_id) {
            self.broadcast_typing(&indicator, Some(connection));
        }
        info!(connection = %connection, user = %user_id, "User disconnected");
    }

    fn activate(&self, connection: &ConnectionId, user: User) -> User {
        let registration = {
            let _gate = self.lock_presence();
            let registration = self.presence.register(user, connection);
            if self.config.enable_online_status {
                self.transport.emit(
                    &Target::All,
                    &ServerEvent::UserOnline {
                        user_id: registration.user.id.clone(),
                    },
                );
                self.broadcast_presence();
            }
            registration
        };
        let user = registration.user;

        if let Some(previous) = registration.replaced {
            info!(user = %user.id, previous = %previous, "Connection superseded");
            self.transport.leave_all(&previous);
            self.transport.emit(
                &Target::Connection(previous),
                &ServerEvent::error("Session replaced by a newer connection"),
            );
        }

        self.join(connection, &user_room(&user.id));
        if self.config.enable_groups {
            for group in self.groups.groups_of(&user.id) {
                self.join(connection, &group_room(&group.id));
            }
        }

        if self.config.message_history {
            let history = self
                .messages
                .history(&ConversationKey::Global, self.config.history_page_size);
            self.transport.emit(
                &Target::Connection(connection.clone()),
                &ServerEvent::History(history),
            );
        }

        info!(connection = %connection, user = %user.id, username = %user.username, "User active");
        user
    }

    // Event handling

    /// Parse and handle a raw envelope.
    pub async fn handle_envelope(
        self: &Arc<Self>,
        connection: &ConnectionId,
        envelope: &ClientEnvelope,
    ) -> AckBody {
        match envelope.parse() {
            Ok(event) => self.handle_event(connection, event).await,
            Err(err) => {
                warn!(connection = %connection, event = %envelope.event, error = %err, "Rejected envelope");
                AckBody::err(SessionError::Validation(err.to_string()).client_message())
            }
        }
    }

    /// Handle one inbound event and produce its acknowledgment.
    ///
    /// Never fails: errors and panics become `{success: false}` bodies.
    pub async fn handle_event(
        self: &Arc<Self>,
        connection: &ConnectionId,
        event: ClientEvent,
    ) -> AckBody {
        let name = event.name();
        debug!(connection = %connection, event = name, "Handling event");

        match AssertUnwindSafe(self.dispatch(connection, event))
            .catch_unwind()
            .await
        {
            Ok(Ok(payload)) => AckBody::ok(payload),
            Ok(Err(err)) => self.reject(connection, name, &err),
            Err(_) => {
                error!(connection = %connection, event = name, "Event handler panicked");
                self.reject(
                    connection,
                    name,
                    &SessionError::Internal("handler panicked".into()),
                )
            }
        }
    }

    fn reject(&self, connection: &ConnectionId, event: &str, err: &SessionError) -> AckBody {
        if err.is_recoverable() {
            warn!(connection = %connection, event, error = %err, "Request rejected");
        } else {
            error!(connection = %connection, event, error = %err, kind = err.kind(), "Request failed");
            self.transport.emit(
                &Target::Connection(connection.clone()),
                &ServerEvent::error(INTERNAL_ERROR),
            );
        }
        AckBody::err(err.client_message())
    }

    async fn dispatch(
        self: &Arc<Self>,
        connection: &ConnectionId,
        event: ClientEvent,
    ) -> Result<Value, SessionError> {
        let user = || {
            self.presence
                .user_for(connection)
                .ok_or(SessionError::AuthenticationRequired)
        };

        match event {
            ClientEvent::Login(request) => self.login(connection, request).await,
            ClientEvent::SendMessage(request) => self.send_message(connection, &user()?, request),
            ClientEvent::MessageDelivered(request) => self.acknowledge_delivery(&user()?, &request),
            ClientEvent::MessageRead(request) => self.acknowledge_read(&user()?, &request),
            ClientEvent::History(request) => self.history(&user()?, &request),
            ClientEvent::CreateGroup(request) => self.create_group(&user()?, request),
            ClientEvent::JoinGroup(request) => self.join_group(connection, &user()?, &request),
            ClientEvent::LeaveGroup(request) => self.leave_group(connection, &user()?, &request),
            ClientEvent::ListGroups => self.list_groups(&user()?),
            ClientEvent::TypingStart(request) => self.typing_start(connection, &user()?, &request),
            ClientEvent::TypingStop(request) => self.typing_stop(connection, &user()?, &request),
            ClientEvent::GetOnline => user().and_then(|_| self.online_users()),
        }
    }

    async fn login(
        &self,
        connection: &ConnectionId,
        request: LoginRequest,
    ) -> Result<Value, SessionError> {
        let state = self
            .presence
            .connection_state(connection)
            .ok_or_else(|| SessionError::Internal(format!("unknown connection {connection}")))?;

        if !self.config.enable_authentication {
            let user = self
                .presence
                .user_for(connection)
                .ok_or(SessionError::AuthenticationRequired)?;
            return to_payload("user", &user);
        }

        let authenticator = self
            .authenticator
            .as_ref()
            .ok_or(SessionError::AuthenticationFailed)?;
        let user = authenticator
            .verify(&request.token)
            .await
            .ok_or(SessionError::AuthenticationFailed)?;

        if state.phase == ConnectionPhase::Active {
            return match self.presence.user_for(connection) {
                Some(current) if current.id == user.id => to_payload("user", &current),
                _ => Err(SessionError::Validation(
                    "Connection is already authenticated as another user".into(),
                )),
            };
        }

        // The socket may have closed while the token was being verified.
        if self.presence.connection_state(connection).is_none() {
            return Err(SessionError::Internal(format!(
                "connection {connection} closed during login"
            )));
        }

        let user = self.activate(connection, user);
        to_payload("user", &user)
    }

    fn send_message(
        &self,
        connection: &ConnectionId,
        sender: &User,
        request: SendMessageRequest,
    ) -> Result<Value, SessionError> {
        if !self
            .rate_limiter
            .admit(connection, tokio::time::Instant::now().into_std())
        {
            return Err(SessionError::RateLimitExceeded);
        }
        self.validator
            .validate_message(&request)
            .map_err(SessionError::Validation)?;

        let _gate = self.lock_conversations();
        let conversation = ConversationKey::from_group(request.group_id.as_deref());
        self.require_access(&sender.id, &conversation)?;

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            content: request.content.trim().to_string(),
            sender_id: sender.id.clone(),
            sender_username: sender.username.clone(),
            group_id: request.group_id,
            timestamp: now_millis(),
            message_type: request.message_type,
            delivery_status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            metadata: request.metadata,
        };
        self.messages.append(message.clone())?;

        let recipients = self.transport.emit(
            &conversation_target(&conversation),
            &ServerEvent::MessageReceived(message.clone()),
        );
        debug!(message = %message.id, conversation = %conversation, recipients, "Message fanned out");

        if self.config.enable_message_delivery {
            self.mark_delivered_to_online(&message, &conversation)?;
        }

        let stored = self.messages.get(&message.id).unwrap_or(message);
        to_payload("message", &stored)
    }

    /// Optimistically treat every online participant as having received the message.
    fn mark_delivered_to_online(
        &self,
        message: &Message,
        conversation: &ConversationKey,
    ) -> Result<(), SessionError> {
        let recipients: Vec<String> = match conversation {
            ConversationKey::Global => self
                .presence
                .list_online()
                .into_iter()
                .map(|u| u.id)
                .collect(),
            ConversationKey::Group(group_id) => self
                .groups
                .members_of(group_id)?
                .into_iter()
                .filter(|id| self.presence.is_online(id))
                .collect(),
        };

        let sender_room = Target::room(user_room(&message.sender_id));
        let mut delivered = false;
        for recipient in recipients.into_iter().filter(|id| id != &message.sender_id) {
            if !delivered {
                match self.messages.mark_delivered(&message.id) {
                    // A small history cap can evict the message before this point.
                    Ok(_) | Err(StoreError::MessageNotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                delivered = true;
            }
            self.transport.emit(
                &sender_room,
                &ServerEvent::Delivered(Receipt {
                    message_id: message.id.clone(),
                    user_id: recipient,
                }),
            );
        }
        Ok(())
    }

    fn acknowledge_delivery(&self, user: &User, request: &MessageRef) -> Result<Value, SessionError> {
        if !self.config.enable_message_delivery {
            return Err(SessionError::FeatureDisabled("Delivery receipts"));
        }
        let message = self.visible_message(&user.id, &request.message_id)?;
        if message.sender_id == user.id {
            return Ok(json!({ "messageId": message.id }));
        }

        self.messages.mark_delivered(&message.id)?;
        self.notify_sender(
            &message,
            &user.id,
            ServerEvent::Delivered(Receipt {
                message_id: message.id.clone(),
                user_id: user.id.clone(),
            }),
        );
        Ok(json!({ "messageId": message.id }))
    }

    fn acknowledge_read(&self, user: &User, request: &MessageRef) -> Result<Value, SessionError> {
        if !self.config.enable_message_delivery {
            return Err(SessionError::FeatureDisabled("Delivery receipts"));
        }
        let message = self.visible_message(&user.id, &request.message_id)?;
        // Senders do not produce receipts for their own messages.
        if message.sender_id == user.id {
            return Ok(json!({ "messageId": message.id }));
        }

        if self.messages.mark_read(&message.id, &user.id, now_millis())? {
            self.notify_sender(
                &message,
                &user.id,
                ServerEvent::Read(Receipt {
                    message_id: message.id.clone(),
                    user_id: user.id.clone(),
                }),
            );
        }
        Ok(json!({ "messageId": message.id }))
    }

    fn visible_message(&self, user_id: &str, message_id: &str) -> Result<Message, SessionError> {
        let message = self
            .messages
            .get(message_id)
            .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))?;
        if let Some(group_id) = &message.group_id {
            if !self.groups.is_member(group_id, user_id) {
                return Err(SessionError::NotAGroupMember(group_id.clone()));
            }
        }
        Ok(message)
    }

    fn notify_sender(&self, message: &Message, reader_id: &str, event: ServerEvent) {
        if message.is_system() || message.sender_id == reader_id {
            return;
        }
        self.transport
            .emit(&Target::room(user_room(&message.sender_id)), &event);
    }

    fn history(&self, user: &User, request: &HistoryRequest) -> Result<Value, SessionError> {
        if !self.config.message_history {
            return Err(SessionError::FeatureDisabled("Message history"));
        }
        let conversation = ConversationKey::from_group(request.group_id.as_deref());
        self.require_access(&user.id, &conversation)?;

        let limit = request
            .limit
            .unwrap_or(self.config.history_page_size)
            .min(self.config.max_message_history);
        let messages = self.messages.history(&conversation, limit);
        to_payload("messages", &messages)
    }

    fn create_group(&self, creator: &User, request: CreateGroupRequest) -> Result<Value, SessionError> {
        if !self.config.enable_groups {
            return Err(SessionError::FeatureDisabled("Groups"));
        }
        self.validator
            .validate_group(&request)
            .map_err(SessionError::Validation)?;

        let _gate = self.lock_conversations();
        let group = self.groups.create(
            request.name.trim(),
            request.description,
            request.is_private,
            &creator.id,
            request.members,
        );

        // Offline members join the room when they next become active.
        let room = group_room(&group.id);
        for member in &group.members {
            if let Some(connection) = self.presence.connection_for(member) {
                self.join(&connection, &room);
                self.transport.emit(
                    &Target::Connection(connection),
                    &ServerEvent::GroupJoined(group.clone()),
                );
            }
        }

        info!(group = %group.id, creator = %creator.id, members = group.members.len(), "Group created");
        to_payload("group", &group)
    }

    fn join_group(
        &self,
        connection: &ConnectionId,
        user: &User,
        request: &GroupRef,
    ) -> Result<Value, SessionError> {
        if !self.config.enable_groups {
            return Err(SessionError::FeatureDisabled("Groups"));
        }

        let _gate = self.lock_conversations();
        let already_member = self.groups.is_member(&request.group_id, &user.id);
        let group = self.groups.join(&request.group_id, &user.id)?;
        let room = group_room(&group.id);
        self.join(connection, &room);

        if !already_member {
            self.transport.broadcast(
                &Target::room(room),
                &ServerEvent::MemberJoined {
                    group_id: group.id.clone(),
                    user: user.clone(),
                },
                Some(connection),
            );
            self.post_system_message(&group.id, format!("{} joined the group", user.username))?;
        }

        to_payload("group", &group)
    }

    fn leave_group(
        &self,
        connection: &ConnectionId,
        user: &User,
        request: &GroupRef,
    ) -> Result<Value, SessionError> {
        if !self.config.enable_groups {
            return Err(SessionError::FeatureDisabled("Groups"));
        }

        let _gate = self.lock_conversations();
        let was_member = self.groups.is_member(&request.group_id, &user.id);
        let group = self.groups.leave(&request.group_id, &user.id)?;
        let room = group_room(&group.id);

        let conversation = ConversationKey::Group(group.id.clone());
        if let Some(indicator) = self.typing.stop(&user.id, &conversation) {
            self.broadcast_typing(&indicator, Some(connection));
        }
        self.transport.leave_room(connection, &room);

        if was_member {
            self.transport.emit(
                &Target::room(room),
                &ServerEvent::MemberLeft {
                    group_id: group.id.clone(),
                    user_id: user.id.clone(),
                },
            );
            self.post_system_message(&group.id, format!("{} left the group", user.username))?;
        }

        Ok(json!({ "groupId": group.id }))
    }

    fn list_groups(&self, user: &User) -> Result<Value, SessionError> {
        if !self.config.enable_groups {
            return Err(SessionError::FeatureDisabled("Groups"));
        }
        to_payload("groups", &self.groups.visible_to(&user.id))
    }

    fn typing_start(
        self: &Arc<Self>,
        connection: &ConnectionId,
        user: &User,
        request: &TypingRequest,
    ) -> Result<Value, SessionError> {
        if !self.config.enable_typing_indicator {
            return Err(SessionError::FeatureDisabled("Typing indicators"));
        }
        let conversation = ConversationKey::from_group(request.group_id.as_deref());
        self.require_access(&user.id, &conversation)?;

        let coordinator: Weak<Self> = Arc::downgrade(self);
        let typist = connection.clone();
        let indicator = self.typing.start(&user.id, &user.username, conversation, move |stopped| {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.broadcast_typing(&stopped, Some(&typist));
            }
        });
        self.broadcast_typing(&indicator, Some(connection));

        to_payload("indicator", &indicator)
    }

    fn typing_stop(
        &self,
        connection: &ConnectionId,
        user: &User,
        request: &TypingRequest,
    ) -> Result<Value, SessionError> {
        if !self.config.enable_typing_indicator {
            return Err(SessionError::FeatureDisabled("Typing indicators"));
        }
        let conversation = ConversationKey::from_group(request.group_id.as_deref());
        let stopped = self.typing.stop(&user.id, &conversation);
        if let Some(indicator) = &stopped {
            self.broadcast_typing(indicator, Some(connection));
        }
        Ok(json!({ "stopped": stopped.is_some() }))
    }

    fn online_users(&self) -> Result<Value, SessionError> {
        if !self.config.enable_online_status {
            return Err(SessionError::FeatureDisabled("Online status updates"));
        }
        to_payload("users", &self.presence.list_online())
    }

    // Helpers

    /// Global is open to everyone; a group requires membership.
    fn require_access(&self, user_id: &str, conversation: &ConversationKey) -> Result<(), SessionError> {
        let ConversationKey::Group(group_id) = conversation else {
            return Ok(());
        };
        if !self.config.enable_groups {
            return Err(SessionError::FeatureDisabled("Groups"));
        }
        if !self.groups.exists(group_id) {
            return Err(SessionError::GroupNotFound(group_id.clone()));
        }
        if !self.groups.is_member(group_id, user_id) {
            return Err(SessionError::NotAGroupMember(group_id.clone()));
        }
        Ok(())
    }

    fn post_system_message(&self, group_id: &str, content: String) -> Result<Message, SessionError> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            sender_id: SYSTEM_SENDER.to_string(),
            sender_username: SYSTEM_USERNAME.to_string(),
            group_id: Some(group_id.to_string()),
            timestamp: now_millis(),
            message_type: MessageType::System,
            delivery_status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            metadata: None,
        };
        self.messages.append(message.clone())?;
        self.transport.emit(
            &Target::room(group_room(group_id)),
            &ServerEvent::MessageReceived(message.clone()),
        );
        Ok(message)
    }

    fn broadcast_typing(&self, indicator: &TypingIndicator, except: Option<&ConnectionId>) {
        self.transport.broadcast(
            &conversation_target(&indicator.conversation()),
            &ServerEvent::Typing(indicator.clone()),
            except,
        );
    }

    /// Must be called with the presence gate held.
    fn broadcast_presence(&self) {
        self.transport.emit(
            &Target::All,
            &ServerEvent::PresenceUpdate(self.presence.list_online()),
        );
    }

    fn join(&self, connection: &ConnectionId, room: &str) {
        if let Err(err) = self.transport.join_room(connection, room) {
            warn!(connection = %connection, room = %room, error = %err, "Failed to join room");
        }
    }

    fn lock_presence(&self) -> MutexGuard<'_, ()> {
        self.presence_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_conversations(&self) -> MutexGuard<'_, ()> {
        self.conversation_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn conversation_target(conversation: &ConversationKey) -> Target {
    match conversation {
        ConversationKey::Global => Target::All,
        ConversationKey::Group(group_id) => Target::room(group_room(group_id)),
    }
}

fn anonymous_user(handshake: Handshake) -> User {
    let id = uuid::Uuid::new_v4().to_string();
    let username = handshake
        .username
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("Anonymous-{}", id[..4].to_uppercase()));
    User::new(id, username).with_avatar(handshake.avatar)
}

fn to_payload(key: &str, value: &impl Serialize) -> Result<Value, SessionError> {
    let value = serde_json::to_value(value).map_err(|e| SessionError::Internal(e.to_string()))?;
    let mut payload = serde_json::Map::new();
    payload.insert(key.to_string(), value);
    Ok(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_transport::{FrameReceiver, Hub};
    use parley_protocol::ServerFrame;

    fn engine(config: EngineConfig) -> (Arc<SessionCoordinator>, Arc<Hub>) {
        let hub = Arc::new(Hub::new());
        let coordinator = Arc::new(SessionCoordinator::new(config, hub.clone()));
        (coordinator, hub)
    }

    fn drain(rx: &mut FrameReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event(event) = frame.as_ref() {
                events.push(event.clone());
            }
        }
        events
    }

    fn connect(
        coordinator: &SessionCoordinator,
        hub: &Hub,
        id: &str,
        name: &str,
    ) -> (ConnectionId, FrameReceiver, User) {
        let connection = ConnectionId::new(id);
        let rx = hub.register(connection.clone());
        coordinator.connect(
            &connection,
            Handshake {
                username: Some(name.into()),
                avatar: None,
            },
        );
        let user = coordinator.presence().user_for(&connection).unwrap();
        (connection, rx, user)
    }

    #[tokio::test]
    async fn test_anonymous_connect_pushes_handshake_and_history() {
        let (coordinator, hub) = engine(EngineConfig::default());
        let (_, mut rx, user) = connect(&coordinator, &hub, "c1", "alice");

        assert_eq!(user.username, "alice");
        assert!(user.is_online);

        let events = drain(&mut rx);
        let names: Vec<&str> = events.iter().map(ServerEvent::name).collect();
        assert_eq!(
            names,
            vec!["session:connected", "status:online", "status:update", "message:history"]
        );
    }

    #[test]
    fn test_anonymous_default_username() {
        let user = anonymous_user(Handshake::default());
        assert!(user.username.starts_with("Anonymous-"));
        assert_eq!(user.username.len(), "Anonymous-".len() + 4);
    }

    #[tokio::test]
    async fn test_events_require_authentication() {
        let config = EngineConfig {
            enable_authentication: true,
            ..EngineConfig::default()
        };
        let (coordinator, hub) = engine(config);
        let connection = ConnectionId::new("c1");
        let _rx = hub.register(connection.clone());
        let info = coordinator.connect(&connection, Handshake::default());
        assert!(info.auth_required);

        let ack = coordinator
            .handle_event(&connection, ClientEvent::GetOnline)
            .await;
        assert!(!ack.success);
        assert_eq!(ack.error.as_deref(), Some("Authentication required"));

        let ack = coordinator
            .handle_event(
                &connection,
                ClientEvent::Login(LoginRequest {
                    token: "anything".into(),
                }),
            )
            .await;
        assert_eq!(ack.error.as_deref(), Some("Authentication failed"));
    }

    #[tokio::test]
    async fn test_disconnect_goes_offline_and_broadcasts() {
        let (coordinator, hub) = engine(EngineConfig::default());
        let (alice, _rx_a, alice_user) = connect(&coordinator, &hub, "c1", "alice");
        let (_, mut rx_b, _) = connect(&coordinator, &hub, "c2", "bob");
        drain(&mut rx_b);

        coordinator.disconnect(&alice);

        assert!(!coordinator.presence().is_online(&alice_user.id));
        let events = drain(&mut rx_b);
        assert_eq!(
            events[0],
            ServerEvent::UserOffline {
                user_id: alice_user.id.clone()
            }
        );
        match &events[1] {
            ServerEvent::PresenceUpdate(users) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].username, "bob");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_envelope_is_validation_error() {
        let (coordinator, hub) = engine(EngineConfig::default());
        let (connection, _rx, _) = connect(&coordinator, &hub, "c1", "alice");

        let envelope = ClientEnvelope {
            event: "nope".into(),
            data: Value::Null,
            ack: Some(1),
        };
        let ack = coordinator.handle_envelope(&connection, &envelope).await;
        assert!(!ack.success);
        assert!(ack.error.unwrap().starts_with("Validation error"));
    }

    #[tokio::test]
    async fn test_unrecoverable_error_maps_to_internal_error() {
        let (coordinator, hub) = engine(EngineConfig::default());
        let (connection, mut rx, _) = connect(&coordinator, &hub, "c1", "alice");
        drain(&mut rx);

        let ack = coordinator.reject(
            &connection,
            "message:send",
            &SessionError::DuplicateMessageId("m1".into()),
        );
        assert_eq!(ack.error.as_deref(), Some(INTERNAL_ERROR));
        assert_eq!(drain(&mut rx), vec![ServerEvent::error(INTERNAL_ERROR)]);
    }

    struct PanickingValidator;

    impl PayloadValidator for PanickingValidator {
        fn validate_message(&self, _: &SendMessageRequest) -> Result<(), String> {
            panic!("validator bug");
        }

        fn validate_group(&self, _: &CreateGroupRequest) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let hub = Arc::new(Hub::new());
        let coordinator = Arc::new(
            SessionCoordinator::new(EngineConfig::default(), hub.clone())
                .with_validator(PanickingValidator),
        );
        let (connection, mut rx, _) = connect(&coordinator, &hub, "c1", "alice");
        drain(&mut rx);

        let ack = coordinator
            .handle_event(
                &connection,
                ClientEvent::SendMessage(SendMessageRequest {
                    content: "hello".into(),
                    message_type: MessageType::Text,
                    group_id: None,
                    metadata: None,
                }),
            )
            .await;

        assert!(!ack.success);
        assert_eq!(ack.error.as_deref(), Some(INTERNAL_ERROR));
        assert_eq!(drain(&mut rx), vec![ServerEvent::error(INTERNAL_ERROR)]);
        assert!(coordinator.messages().is_empty());

        // The connection keeps working after the failure.
        let ack = coordinator
            .handle_event(&connection, ClientEvent::GetOnline)
            .await;
        assert!(ack.success);
    }

    #[tokio::test]
    async fn test_stats() {
        let (coordinator, hub) = engine(EngineConfig::default());
        connect(&coordinator, &hub, "c1", "alice");
        let stats = coordinator.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.online_users, 1);
        assert_eq!(stats.messages, 0);
    }
}
