//! Error types for the engine.

use parley_protocol::{GroupId, MessageId};
use thiserror::Error;

/// Errors raised by the individual stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Two messages with the same id. Id generation is broken if this fires.
    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(MessageId),
}

/// Errors surfaced while handling an inbound event.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Not a member of group: {0}")]
    NotAGroupMember(GroupId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("{0} are disabled")]
    FeatureDisabled(&'static str),

    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(MessageId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether the error is an ordinary rejection rather than a broken invariant.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::DuplicateMessageId(_) | Self::Internal(_))
    }

    /// Text placed in the failed acknowledgment.
    ///
    /// Invariant violations are reported generically; the details go to the log.
    #[must_use]
    pub fn client_message(&self) -> String {
        if self.is_recoverable() {
            self.to_string()
        } else {
            INTERNAL_ERROR.to_string()
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::AuthenticationFailed => "authentication_failed",
            Self::Validation(_) => "validation",
            Self::RateLimitExceeded => "rate_limited",
            Self::GroupNotFound(_) => "group_not_found",
            Self::NotAGroupMember(_) => "not_a_member",
            Self::MessageNotFound(_) => "message_not_found",
            Self::FeatureDisabled(_) => "feature_disabled",
            Self::DuplicateMessageId(_) => "duplicate_message_id",
            Self::Internal(_) => "internal",
        }
    }
}

/// Generic text for failures the client cannot act on.
pub const INTERNAL_ERROR: &str = "internal error";

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::GroupNotFound(id) => Self::GroupNotFound(id),
            StoreError::MessageNotFound(id) => Self::MessageNotFound(id),
            StoreError::DuplicateMessageId(id) => Self::DuplicateMessageId(id),
        }
    }
}
