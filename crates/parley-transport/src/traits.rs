//! Transport abstraction traits for Parley.
//!
//! The engine never touches sockets. It talks to a [`Transport`], which
//! knows how to reach a single connection, a named room, or everyone.

use parley_protocol::ServerEvent;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where an outbound event goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// One connection.
    Connection(ConnectionId),
    /// Every connection that joined the named room.
    Room(String),
    /// Every registered connection.
    All,
}

impl Target {
    #[must_use]
    pub fn room(name: impl Into<String>) -> Self {
        Self::Room(name.into())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(id) => write!(f, "connection {id}"),
            Self::Room(name) => write!(f, "room {name}"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),
}

/// The broadcast substrate the engine fans out through.
///
/// Implementations must be cheap and non-blocking: the engine calls
/// them while deciding what to send, never while holding a store lock.
pub trait Transport: Send + Sync {
    /// Deliver `event` to `target`, skipping `except` if given.
    ///
    /// Returns the number of connections the event was queued for.
    fn broadcast(&self, target: &Target, event: &ServerEvent, except: Option<&ConnectionId>)
        -> usize;

    /// Add a connection to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or the room name is invalid.
    fn join_room(&self, connection: &ConnectionId, room: &str) -> Result<(), TransportError>;

    /// Remove a connection from a room. Not being a member is not an error.
    fn leave_room(&self, connection: &ConnectionId, room: &str);

    /// Remove a connection from every room it joined.
    fn leave_all(&self, connection: &ConnectionId);

    /// Deliver `event` to `target`.
    fn emit(&self, target: &Target, event: &ServerEvent) -> usize {
        self.broadcast(target, event, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::room("group:g1").to_string(), "room group:g1");
        assert_eq!(Target::All.to_string(), "all");
    }
}
