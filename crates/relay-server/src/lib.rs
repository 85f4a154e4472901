//! # dirc relay server
//!
//! Real-time chat relay: holds live WebSocket connections from authenticated
//! users, tracks which users are subscribed to which chats, and fans chat
//! events out to the members of each chat.
//!
//! The binary wires [`handlers::run_server`] to the configuration loaded by
//! [`config::Config::load`]; tests build the same router around in-memory
//! services with [`handlers::AppState::with_services`].

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod upstream;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
