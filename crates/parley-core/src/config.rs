//! Engine configuration.
//!
//! Option names follow the camelCase keys clients and operators already
//! use (`enableTypingIndicator`, `rateLimiting.maxMessages`, ...).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Feature switches and limits for a [`SessionCoordinator`](crate::SessionCoordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub enable_typing_indicator: bool,
    pub enable_online_status: bool,
    pub enable_message_delivery: bool,
    pub enable_groups: bool,
    /// Require `auth:login` before any other event.
    pub enable_authentication: bool,
    /// Typing indicator expiry in milliseconds.
    pub typing_timeout: u64,
    /// Push history on connect and answer `message:history`.
    pub message_history: bool,
    /// Number of messages retained before the oldest are evicted.
    pub max_message_history: usize,
    /// Messages pushed on connect, and the default history request size.
    pub history_page_size: usize,
    /// Maximum message content length in characters.
    pub max_content_length: usize,
    pub rate_limiting: RateLimitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_typing_indicator: true,
            enable_online_status: true,
            enable_message_delivery: true,
            enable_groups: true,
            enable_authentication: false,
            typing_timeout: 3_000,
            message_history: true,
            max_message_history: 100,
            history_page_size: 50,
            max_content_length: 5_000,
            rate_limiting: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout)
    }
}

/// Fixed-window rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Messages admitted per window.
    pub max_messages: u32,
    /// Window length in milliseconds.
    pub time_window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 10,
            time_window: 60_000,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.time_window)
    }
}
