//! Connection registry for the relay.
//!
//! Maps each username to the single live outbound channel for that user.
//! Connections are addressed by username, but each carries a unique
//! [`ConnectionId`] so that a superseded connection cannot tear down the entry
//! of the connection that replaced it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// WebSocket close codes used by the relay.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Policy violation (failed handshake, superseded connection).
    pub const POLICY: u16 = 1008;
    /// Unexpected server-side condition.
    pub const ERROR: u16 = 1011;
    /// Server overloaded, retry later.
    pub const AGAIN: u16 = 1013;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// A frame queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A serialized relay event, shared across all recipients of a broadcast.
    Event(Arc<str>),
    /// Ask the connection to close itself.
    Close {
        code: u16,
        reason: Cow<'static, str>,
    },
}

/// Handle to a live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    username: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle for `username` along with the receiving end of its queue.
    #[must_use]
    pub fn new(username: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::next(),
            username: username.into(),
            tx,
        };
        (handle, rx)
    }

    /// The connection's unique ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The owning username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a frame. Returns `false` if the connection has gone away.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Ask the connection to close with the given code and reason.
    pub fn close(&self, code: u16, reason: impl Into<Cow<'static, str>>) -> bool {
        self.send(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }
}

/// Username to live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the current connection for a username.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<ConnectionHandle> {
        self.connections.get(username).map(|entry| entry.value().clone())
    }

    /// Queue a frame for a username without cloning its handle.
    ///
    /// Returns `false` if the user has no live connection here.
    pub fn deliver(&self, username: &str, frame: Outbound) -> bool {
        match self.connections.get(username) {
            Some(handle) => handle.send(frame),
            None => {
                trace!(user = %username, "No live connection, skipping delivery");
                false
            }
        }
    }

    /// Check whether `id` is the current connection for `username`.
    #[must_use]
    pub fn is_current(&self, username: &str, id: ConnectionId) -> bool {
        self.connections
            .get(username)
            .is_some_and(|handle| handle.id == id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Lock the entry for a username.
    ///
    /// Holding the returned entry serializes admission and teardown for that
    /// username.
    pub(crate) fn entry(&self, username: &str) -> Entry<'_, String, ConnectionHandle> {
        self.connections.entry(username.to_string())
    }
}
