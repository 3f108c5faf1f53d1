//! # parley-transport
//!
//! Transport boundary for the Parley chat engine.
//!
//! The engine addresses connections through the [`Transport`] trait:
//!
//! - **Connection** - a single socket
//! - **Room** - a named set of sockets (`user:{id}`, `group:{id}`)
//! - **All** - every registered socket
//!
//! [`Hub`] is the in-process implementation used by the server: each
//! connection gets an unbounded queue that its socket task drains.
//!
//! ```rust
//! use parley_protocol::ServerEvent;
//! use parley_transport::{ConnectionId, Hub, Target, Transport};
//!
//! let hub = Hub::new();
//! let conn = ConnectionId::new("conn-1");
//! let mut rx = hub.register(conn.clone());
//!
//! hub.join_room(&conn, "group:lobby").unwrap();
//! hub.emit(&Target::room("group:lobby"), &ServerEvent::error("hello"));
//! assert!(rx.try_recv().is_ok());
//! ```

pub mod hub;
pub mod room;
pub mod traits;

pub use hub::{FrameReceiver, Hub, HubStats};
pub use room::{group_room, user_room};
pub use traits::{ConnectionId, Target, Transport, TransportError};
