//! Per-connection fixed-window rate limiting.
//!
//! Each connection gets a counter that resets when its window elapses.
//! Windows are not sliding: a client that bursts at the end of one window
//! and again at the start of the next can get up to twice `max_messages`
//! through in a short span. That is accepted in exchange for O(1) state.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use parley_transport::ConnectionId;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window admission control keyed by connection.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<ConnectionId, Window>,
    max_messages: u32,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    /// Create a limiter admitting `max_messages` per `window`.
    #[must_use]
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_messages,
            window,
            enabled: true,
        }
    }

    /// A limiter that admits everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0, Duration::ZERO)
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        if config.enabled {
            Self::new(config.max_messages, config.window())
        } else {
            Self::disabled()
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one request from `connection` at `now`.
    ///
    /// Returns `false` without counting if the window is already full.
    pub fn admit(&self, connection: &ConnectionId, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let mut window = self.windows.entry(connection.clone()).or_insert(Window {
            count: 0,
            resets_at: now,
        });

        if now >= window.resets_at {
            window.count = 0;
            window.resets_at = now + self.window;
        }

        if window.count >= self.max_messages {
            warn!(connection = %connection, limit = self.max_messages, "Rate limit exceeded");
            return false;
        }

        window.count += 1;
        true
    }

    /// Requests `connection` may still make in its current window.
    #[must_use]
    pub fn remaining(&self, connection: &ConnectionId, now: Instant) -> u32 {
        if !self.enabled {
            return u32::MAX;
        }
        match self.windows.get(connection) {
            Some(window) if now < window.resets_at => {
                self.max_messages.saturating_sub(window.count)
            }
            _ => self.max_messages,
        }
    }

    /// Forget a connection's window.
    pub fn release(&self, connection: &ConnectionId) {
        if self.windows.remove(connection).is_some() {
            debug!(connection = %connection, "Rate limit window released");
        }
    }

    /// Number of tracked windows.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
