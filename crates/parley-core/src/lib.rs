//! # parley-core
//!
//! Session coordination for the Parley chat engine.
//!
//! This crate holds the engine state and the rules that tie it together:
//!
//! - **Presence** - Which users are online and through which connection
//! - **Groups** - Group membership
//! - **Messages** - Bounded history with delivery and read receipts
//! - **Typing** - Per-conversation typing indicators with expiry
//! - **Rate limiting** - Fixed-window message admission per connection
//! - **Session** - The coordinator driving all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ SessionCoordinator │────▶│  Transport  │
//! │  (inbound)  │     └────────────────────┘     │ (fan-out)   │
//! └─────────────┘        │   │   │   │   │       └─────────────┘
//!                        ▼   ▼   ▼   ▼   ▼
//!              Presence Groups Messages Typing RateLimiter
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod group;
pub mod message;
pub mod presence;
pub mod rate_limit;
pub mod session;
pub mod typing;
pub mod validate;

pub use auth::{Authenticator, StaticTokenAuthenticator};
pub use config::{EngineConfig, RateLimitConfig};
pub use error::{SessionError, StoreError, INTERNAL_ERROR};
pub use group::GroupStore;
pub use message::MessageStore;
pub use presence::{ConnectionPhase, ConnectionState, PresenceRegistry, Registration};
pub use rate_limit::RateLimiter;
pub use session::{EngineStats, Handshake, SessionCoordinator};
pub use typing::{TypingCoordinator, TypingKey};
pub use validate::{DefaultValidator, PayloadValidator};
