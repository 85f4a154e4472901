//! # dirc-relay-protocol
//!
//! Wire format spoken between chat clients and the dirc relay.
//!
//! Every frame is a JSON text message shaped as a tagged union:
//!
//! ```json
//! {"action": "MESSAGE", "payload": {"chat": "c1", "content": "hi"}}
//! ```
//!
//! ## Event Types
//!
//! - `MESSAGE` - Chat message for a room
//! - `JOIN` - Subscribe to a room
//! - `LEAVE` - Unsubscribe from a room
//!
//! Inbound frames ([`ClientEvent`]) carry only the payload the client controls.
//! Outbound frames ([`RelayEvent`]) add the `sender` and a server-assigned
//! `timestamp`.
//!
//! ## Example
//!
//! ```rust
//! use dirc_relay_protocol::{codec, RelayEvent};
//!
//! let event = codec::decode(br#"{"action":"JOIN","payload":{"chat":"c1"}}"#).unwrap();
//! let outbound = RelayEvent::from_client(event, "bob", 1_700_000_000.0);
//! let text = codec::encode(&outbound).unwrap();
//! assert!(text.contains(r#""sender":"bob""#));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, decode_str, encode, ProtocolError, MAX_EVENT_SIZE};
pub use events::{now_timestamp, Action, ChatId, ClientEvent, RelayEvent};
