//! Payload shape validation.
//!
//! Requests are checked before they touch any store. The engine uses
//! [`DefaultValidator`] unless another [`PayloadValidator`] is supplied.

use parley_protocol::{CreateGroupRequest, MessageType, SendMessageRequest};

/// Maximum group name length in characters.
pub const MAX_GROUP_NAME_LENGTH: usize = 100;

/// Maximum group description length in characters.
pub const MAX_GROUP_DESCRIPTION_LENGTH: usize = 500;

/// Maximum number of initial members of a new group.
pub const MAX_INITIAL_MEMBERS: usize = 1_000;

/// Checks inbound payloads. Returns a human-readable reason on rejection.
pub trait PayloadValidator: Send + Sync {
    /// # Errors
    ///
    /// Returns the reason the message is rejected.
    fn validate_message(&self, request: &SendMessageRequest) -> Result<(), String>;

    /// # Errors
    ///
    /// Returns the reason the group is rejected.
    fn validate_group(&self, request: &CreateGroupRequest) -> Result<(), String>;
}

/// Length and emptiness checks.
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    max_content_length: usize,
}

impl DefaultValidator {
    #[must_use]
    pub fn new(max_content_length: usize) -> Self {
        Self { max_content_length }
    }
}

impl PayloadValidator for DefaultValidator {
    fn validate_message(&self, request: &SendMessageRequest) -> Result<(), String> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err("Message content cannot be empty".into());
        }
        if content.chars().count() > self.max_content_length {
            return Err(format!(
                "Message content exceeds {} characters",
                self.max_content_length
            ));
        }
        if request.message_type == MessageType::System {
            return Err("System messages cannot be sent by clients".into());
        }
        if request.group_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err("Group id cannot be empty".into());
        }
        Ok(())
    }

    fn validate_group(&self, request: &CreateGroupRequest) -> Result<(), String> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err("Group name cannot be empty".into());
        }
        if name.chars().count() > MAX_GROUP_NAME_LENGTH {
            return Err(format!("Group name exceeds {MAX_GROUP_NAME_LENGTH} characters"));
        }
        if request
            .description
            .as_deref()
            .is_some_and(|d| d.chars().count() > MAX_GROUP_DESCRIPTION_LENGTH)
        {
            return Err(format!(
                "Group description exceeds {MAX_GROUP_DESCRIPTION_LENGTH} characters"
            ));
        }
        if request.members.len() > MAX_INITIAL_MEMBERS {
            return Err(format!("A group cannot start with more than {MAX_INITIAL_MEMBERS} members"));
        }
        if request.members.iter().any(|m| m.trim().is_empty()) {
            return Err("Member ids cannot be empty".into());
        }
        Ok(())
    }
}
