//! In-process broadcast hub.
//!
//! The hub keeps one outbound queue per connection and a room membership
//! index. Socket tasks drain their queue and write to the wire.

use crate::room::validate_room_name;
use crate::traits::{ConnectionId, Target, Transport, TransportError};
use dashmap::{DashMap, DashSet};
use parley_protocol::{ServerEvent, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving half of a connection's outbound queue.
pub type FrameReceiver = mpsc::UnboundedReceiver<Arc<ServerFrame>>;

type FrameSender = mpsc::UnboundedSender<Arc<ServerFrame>>;

/// Room-based fan-out over per-connection queues.
#[derive(Default)]
pub struct Hub {
    /// Outbound queues indexed by connection.
    connections: DashMap<ConnectionId, FrameSender>,
    /// Room name -> member connections.
    rooms: DashMap<String, DashSet<ConnectionId>>,
    /// Connection -> rooms it joined.
    memberships: DashMap<ConnectionId, DashSet<String>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its outbound queue.
    ///
    /// Registering an id twice replaces the previous queue.
    pub fn register(&self, connection: ConnectionId) -> FrameReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection, "Hub: connection registered");
        self.connections.insert(connection, tx);
        rx
    }

    /// Drop a connection and all of its room memberships.
    pub fn unregister(&self, connection: &ConnectionId) {
        self.leave_all(connection);
        if self.connections.remove(connection).is_some() {
            debug!(connection = %connection, "Hub: connection unregistered");
        }
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Queue a frame for one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or its queue is closed.
    pub fn send(&self, connection: &ConnectionId, frame: ServerFrame) -> Result<(), TransportError> {
        let sender = self
            .connections
            .get(connection)
            .ok_or_else(|| TransportError::UnknownConnection(connection.clone()))?;
        sender
            .send(Arc::new(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Connections currently in a room.
    #[must_use]
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }

    /// Rooms a connection has joined.
    #[must_use]
    pub fn connection_rooms(&self, connection: &ConnectionId) -> Vec<String> {
        self.memberships
            .get(connection)
            .map(|rooms| rooms.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.connections.len(),
            room_count: self.rooms.len(),
            total_memberships: self.memberships.iter().map(|m| m.len()).sum(),
        }
    }

    fn deliver(&self, connection: &ConnectionId, frame: &Arc<ServerFrame>) -> bool {
        match self.connections.get(connection) {
            Some(sender) => sender.send(Arc::clone(frame)).is_ok(),
            None => false,
        }
    }
}

impl Transport for Hub {
    fn broadcast(
        &self,
        target: &Target,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let frame = Arc::new(ServerFrame::Event(event.clone()));
        let skip = |c: &ConnectionId| except.is_some_and(|e| e == c);

        let count = match target {
            Target::Connection(id) => usize::from(!skip(id) && self.deliver(id, &frame)),
            Target::Room(name) => self
                .room_members(name)
                .iter()
                .filter(|c| !skip(c) && self.deliver(c, &frame))
                .count(),
            Target::All => self
                .connections
                .iter()
                .filter(|entry| !skip(entry.key()))
                .filter(|entry| entry.value().send(Arc::clone(&frame)).is_ok())
                .count(),
        };

        trace!(target = %target, event = event.name(), recipients = count, "Hub: broadcast");
        count
    }

    fn join_room(&self, connection: &ConnectionId, room: &str) -> Result<(), TransportError> {
        validate_room_name(room).map_err(TransportError::InvalidRoom)?;
        if !self.connections.contains_key(connection) {
            return Err(TransportError::UnknownConnection(connection.clone()));
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection.clone());
        self.memberships
            .entry(connection.clone())
            .or_default()
            .insert(room.to_string());

        debug!(connection = %connection, room = %room, "Hub: joined room");
        Ok(())
    }

    fn leave_room(&self, connection: &ConnectionId, room: &str) {
        if let Some(rooms) = self.memberships.get(connection) {
            rooms.remove(room);
        }
        if let Some(members) = self.rooms.get(room) {
            members.remove(connection);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
        debug!(connection = %connection, room = %room, "Hub: left room");
    }

    fn leave_all(&self, connection: &ConnectionId) {
        if let Some((_, rooms)) = self.memberships.remove(connection) {
            for room in rooms.iter() {
                if let Some(members) = self.rooms.get(room.as_str()) {
                    members.remove(connection);
                }
                self.rooms
                    .remove_if(room.as_str(), |_, members| members.is_empty());
            }
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    /// Number of registered connections.
    pub connection_count: usize,
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Total number of room memberships.
    pub total_memberships: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(user_id: &str) -> ServerEvent {
        ServerEvent::UserOnline {
            user_id: user_id.into(),
        }
    }

    #[test]
    fn test_room_fanout() {
        let hub = Hub::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let c = ConnectionId::new("c");
        let mut rx_a = hub.register(a.clone());
        let mut rx_b = hub.register(b.clone());
        let mut rx_c = hub.register(c.clone());

        hub.join_room(&a, "group:g1").unwrap();
        hub.join_room(&b, "group:g1").unwrap();

        assert_eq!(hub.emit(&Target::room("group:g1"), &online("u1")), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_except() {
        let hub = Hub::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let mut rx_a = hub.register(a.clone());
        let mut rx_b = hub.register(b.clone());

        assert_eq!(hub.broadcast(&Target::All, &online("u1"), Some(&a)), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_join_unknown_connection() {
        let hub = Hub::new();
        assert!(matches!(
            hub.join_room(&ConnectionId::new("ghost"), "group:g1"),
            Err(TransportError::UnknownConnection(_))
        ));

        let a = ConnectionId::new("a");
        let _rx = hub.register(a.clone());
        assert!(matches!(
            hub.join_room(&a, ""),
            Err(TransportError::InvalidRoom(_))
        ));
    }

    #[test]
    fn test_unregister_cleans_rooms() {
        let hub = Hub::new();
        let a = ConnectionId::new("a");
        let _rx = hub.register(a.clone());
        hub.join_room(&a, "group:g1").unwrap();
        hub.join_room(&a, "user:u1").unwrap();
        assert_eq!(hub.stats().room_count, 2);
        assert_eq!(hub.connection_rooms(&a).len(), 2);

        hub.unregister(&a);

        assert_eq!(
            hub.stats(),
            HubStats {
                connection_count: 0,
                room_count: 0,
                total_memberships: 0,
            }
        );
        assert!(hub.room_members("group:g1").is_empty());
    }

    #[test]
    fn test_leave_room() {
        let hub = Hub::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");
        let _rx_a = hub.register(a.clone());
        let _rx_b = hub.register(b.clone());
        hub.join_room(&a, "group:g1").unwrap();
        hub.join_room(&b, "group:g1").unwrap();

        hub.leave_room(&a, "group:g1");
        assert_eq!(hub.room_members("group:g1"), vec![b.clone()]);

        hub.leave_room(&b, "group:g1");
        assert_eq!(hub.stats().room_count, 0);
    }

    #[tokio::test]
    async fn test_send_frame() {
        let hub = Hub::new();
        let a = ConnectionId::new("a");
        let mut rx = hub.register(a.clone());

        hub.send(&a, ServerFrame::Event(online("u1"))).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(*frame, ServerFrame::Event(online("u1")));

        drop(rx);
        assert!(matches!(
            hub.send(&a, ServerFrame::Event(online("u1"))),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
