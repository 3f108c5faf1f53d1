//! Presence tracking for Parley.
//!
//! The registry owns every connection's [`ConnectionState`], the user
//! records (kept for the life of the process), and the single active
//! connection bound to each online user.

use parley_protocol::{now_millis, User, UserId};
use parley_transport::ConnectionId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for `auth:login`.
    Authenticating,
    /// Bound to a user.
    Active,
}

/// Everything the engine knows about one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connection_id: ConnectionId,
    pub phase: ConnectionPhase,
    pub user_id: Option<UserId>,
    pub connected_at: u64,
}

/// Result of binding a user to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The user as now stored (online).
    pub user: User,
    /// A previous connection of the same user that lost its binding.
    pub replaced: Option<ConnectionId>,
}

#[derive(Debug, Default)]
struct PresenceInner {
    users: HashMap<UserId, User>,
    connections: HashMap<ConnectionId, ConnectionState>,
    bindings: HashMap<UserId, ConnectionId>,
    /// Online users in the order they came online.
    online: Vec<UserId>,
}

/// Online/offline state and connection lookup.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    inner: RwLock<PresenceInner>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PresenceInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PresenceInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new, not yet authenticated connection.
    pub fn attach(&self, connection_id: &ConnectionId) {
        let state = ConnectionState {
            connection_id: connection_id.clone(),
            phase: ConnectionPhase::Authenticating,
            user_id: None,
            connected_at: now_millis(),
        };
        self.write().connections.insert(connection_id.clone(), state);
    }

    /// Mark `user` online and bind it to `connection_id`.
    ///
    /// A previous binding for the same user id is replaced. Username and
    /// avatar are refreshed from `user`; the online flag and last-seen
    /// time are owned by the registry.
    pub fn register(&self, user: User, connection_id: &ConnectionId) -> Registration {
        let mut inner = self.write();
        let user_id = user.id.clone();

        let stored = inner
            .users
            .entry(user_id.clone())
            .or_insert_with(|| user.clone());
        stored.username = user.username;
        stored.avatar = user.avatar;
        stored.is_online = true;
        let stored = stored.clone();

        let replaced = inner
            .bindings
            .insert(user_id.clone(), connection_id.clone())
            .filter(|previous| previous != connection_id);
        if let Some(previous) = &replaced {
            // The superseded connection must log in again to act.
            if let Some(state) = inner.connections.get_mut(previous) {
                state.phase = ConnectionPhase::Authenticating;
                state.user_id = None;
            }
        }
        if !inner.online.contains(&user_id) {
            inner.online.push(user_id.clone());
        }

        let state = inner
            .connections
            .entry(connection_id.clone())
            .or_insert_with(|| ConnectionState {
                connection_id: connection_id.clone(),
                phase: ConnectionPhase::Active,
                user_id: None,
                connected_at: now_millis(),
            });
        state.phase = ConnectionPhase::Active;
        state.user_id = Some(user_id.clone());

        debug!(user = %user_id, connection = %connection_id, "Presence: user online");
        Registration {
            user: stored,
            replaced,
        }
    }

    /// Mark `user_id` offline if `connection_id` still holds its binding.
    ///
    /// Returns the offline user, or `None` if the binding already moved to
    /// another connection (or never existed).
    pub fn unregister(&self, user_id: &str, connection_id: &ConnectionId) -> Option<User> {
        let mut inner = self.write();

        if inner.bindings.get(user_id) != Some(connection_id) {
            return None;
        }
        inner.bindings.remove(user_id);
        inner.online.retain(|id| id != user_id);

        let user = inner.users.get_mut(user_id)?;
        user.is_online = false;
        user.last_seen = Some(now_millis());

        debug!(user = %user_id, connection = %connection_id, "Presence: user offline");
        Some(user.clone())
    }

    /// Forget a connection's state.
    pub fn detach(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.write().connections.remove(connection_id)
    }

    /// Online users in the order they came online.
    #[must_use]
    pub fn list_online(&self) -> Vec<User> {
        let inner = self.read();
        inner
            .online
            .iter()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect()
    }

    /// The active connection of a user.
    #[must_use]
    pub fn connection_for(&self, user_id: &str) -> Option<ConnectionId> {
        self.read().bindings.get(user_id).cloned()
    }

    #[must_use]
    pub fn connection_state(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.read().connections.get(connection_id).cloned()
    }

    /// The user bound to an active connection.
    #[must_use]
    pub fn user_for(&self, connection_id: &ConnectionId) -> Option<User> {
        let inner = self.read();
        let state = inner.connections.get(connection_id)?;
        if state.phase != ConnectionPhase::Active {
            return None;
        }
        state
            .user_id
            .as_ref()
            .and_then(|id| inner.users.get(id))
            .cloned()
    }

    /// Look up a user record, online or not.
    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<User> {
        self.read().users.get(user_id).cloned()
    }

    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.read().bindings.contains_key(user_id)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.read().online.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }
}
