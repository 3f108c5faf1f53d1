//! # Parley Server
//!
//! WebSocket front end for the Parley chat engine.
//!
//! Clients connect to the WebSocket endpoint (default `/ws`), optionally
//! passing `username`, `avatar` and `encoding=binary` as query
//! parameters, and exchange `{event, data, ack}` envelopes with the
//! server. `/health` reports engine counters.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
