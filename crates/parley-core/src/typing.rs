//! Typing indicators with automatic expiry.
//!
//! Each `(user, conversation)` pair is either idle (no entry) or typing
//! (entry plus an armed expiry task). Every `start` stamps the entry with
//! a fresh epoch; an expiry task only removes the entry if the epoch it
//! was armed with is still current, so a timer that loses a race with a
//! restart or a stop does nothing.

use dashmap::DashMap;
use parley_protocol::{now_millis, ConversationKey, TypingIndicator, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifies one typing state machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypingKey {
    pub user_id: UserId,
    pub conversation: ConversationKey,
}

impl TypingKey {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, conversation: ConversationKey) -> Self {
        Self {
            user_id: user_id.into(),
            conversation,
        }
    }
}

#[derive(Debug)]
struct TypingEntry {
    indicator: TypingIndicator,
    epoch: u64,
    timer: Option<AbortHandle>,
}

impl TypingEntry {
    fn cancel(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

/// Tracks who is typing where.
#[derive(Debug)]
pub struct TypingCoordinator {
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    epochs: AtomicU64,
    timeout: Duration,
}

impl TypingCoordinator {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            epochs: AtomicU64::new(0),
            timeout,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mark `user_id` as typing in `conversation` and (re)arm its expiry.
    ///
    /// If the user was already typing, the previous timer is cancelled and
    /// the clock restarts. When the new timer fires without being cancelled,
    /// the entry is removed and `on_expire` receives the stopped indicator.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<F>(
        &self,
        user_id: &str,
        username: &str,
        conversation: ConversationKey,
        on_expire: F,
    ) -> TypingIndicator
    where
        F: FnOnce(TypingIndicator) + Send + 'static,
    {
        let key = TypingKey::new(user_id, conversation);
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let indicator = TypingIndicator {
            user_id: key.user_id.clone(),
            username: username.to_string(),
            group_id: key.conversation.group_id().map(str::to_string),
            is_typing: true,
            timestamp: now_millis(),
        };

        let entry = TypingEntry {
            indicator: indicator.clone(),
            epoch,
            timer: None,
        };
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            previous.cancel();
            trace!(user = %key.user_id, conversation = %key.conversation, "Typing timer restarted");
        }

        let deadline = Instant::now() + self.timeout;
        let entries = Arc::clone(&self.entries);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some((_, entry)) = entries.remove_if(&task_key, |_, e| e.epoch == epoch) {
                debug!(
                    user = %task_key.user_id,
                    conversation = %task_key.conversation,
                    "Typing indicator expired"
                );
                on_expire(entry.indicator.stopped());
            }
        });

        match self.entries.get_mut(&key) {
            Some(mut entry) if entry.epoch == epoch => {
                entry.timer = Some(handle.abort_handle());
            }
            _ => {}
        }

        indicator
    }

    /// Stop a typing indicator.
    ///
    /// Returns the stopped indicator, or `None` if the user was not typing.
    pub fn stop(&self, user_id: &str, conversation: &ConversationKey) -> Option<TypingIndicator> {
        let key = TypingKey::new(user_id, conversation.clone());
        let (_, entry) = self.entries.remove(&key)?;
        entry.cancel();
        Some(entry.indicator.stopped())
    }

    /// Stop every indicator held by `user_id`.
    pub fn stop_all(&self, user_id: &str) -> Vec<TypingIndicator> {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter()
            .filter_map(|key| self.stop(&key.user_id, &key.conversation))
            .collect()
    }

    #[must_use]
    pub fn is_typing(&self, user_id: &str, conversation: &ConversationKey) -> bool {
        self.entries
            .contains_key(&TypingKey::new(user_id, conversation.clone()))
    }

    /// Everyone currently typing in a conversation.
    #[must_use]
    pub fn typing_in(&self, conversation: &ConversationKey) -> Vec<TypingIndicator> {
        self.entries
            .iter()
            .filter(|entry| &entry.key().conversation == conversation)
            .map(|entry| entry.value().indicator.clone())
            .collect()
    }

    /// Number of active indicators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
