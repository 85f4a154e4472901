//! # dirc-relay-core
//!
//! Shared state and event processing for the dirc chat relay.
//!
//! This crate provides the building blocks the server wires together:
//!
//! - **MembershipTable** - Which usernames are subscribed to which chats
//! - **ConnectionRegistry** - Each username's single live outbound queue
//! - **Hub** - Owns both of the above; admission, broadcast and teardown
//! - **Gate** - Handshake authentication and membership bootstrap
//! - **Session** - Per-connection action processing
//! - **Dispatcher** - Fire-and-forget side-effect calls
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Gate     │────▶│   Session   │────▶│     Hub     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │              │         │
//!                            ▼              ▼         ▼
//!                     ┌─────────────┐  ┌─────────┐ ┌──────────┐
//!                     │ Dispatcher  │  │Registry │ │Membership│
//!                     └─────────────┘  └─────────┘ └──────────┘
//! ```

pub mod dispatch;
pub mod gate;
pub mod hub;
pub mod membership;
pub mod registry;
pub mod services;
pub mod session;

pub use dispatch::{Dispatcher, FailureHook};
pub use gate::{
    authenticate, bootstrap, BootstrapPolicy, Credentials, HandshakeError, HandshakeParams,
};
pub use hub::{Hub, HubStats};
pub use membership::MembershipTable;
pub use registry::{close_code, ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound};
pub use services::{Authenticator, ChatDirectory, ChatInfo, ServiceError};
pub use session::Session;
