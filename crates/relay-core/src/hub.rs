//! The relay hub.
//!
//! [`Hub`] owns the connection registry and the membership table and is the
//! only path through which either is mutated. It also implements broadcast
//! fan-out and connection teardown.
//!
//! Lock order: a registry entry may be held while membership shards are
//! locked, never the reverse. Broadcast takes a membership snapshot, releases
//! it, and only then touches the registry.

use crate::gate::HandshakeError;
use crate::membership::MembershipTable;
use crate::registry::{close_code, ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound};
use dashmap::mapref::entry::Entry;
use dirc_relay_protocol::{codec, ChatId, RelayEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Close reason sent to a connection replaced by a newer one for the same user.
pub const SUPERSEDED_REASON: &str = "superseded by a newer connection";

/// Shared relay state.
#[derive(Debug)]
pub struct Hub {
    registry: ConnectionRegistry,
    memberships: MembershipTable,
    live: AtomicUsize,
    capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::with_capacity(usize::MAX)
    }
}

impl Hub {
    /// Create an empty hub with no connection limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub that admits at most `capacity` distinct users.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            memberships: MembershipTable::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Read access to the connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Read access to the membership table.
    #[must_use]
    pub fn memberships(&self) -> &MembershipTable {
        &self.memberships
    }

    /// Admit an authenticated connection.
    ///
    /// Seeds the username into each of `chats` and installs the handle as the
    /// user's live connection, both under the user's registry entry lock. Any
    /// previous connection for the same username is told to close. Replacing
    /// a connection does not count against capacity.
    ///
    /// Returns the superseded connection, if there was one.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::CapacityReached`] if admitting a new user
    /// would exceed the hub's capacity. Nothing is mutated in that case.
    pub fn admit(
        &self,
        handle: ConnectionHandle,
        chats: &[ChatId],
    ) -> Result<Option<ConnectionHandle>, HandshakeError> {
        let username = handle.username().to_string();
        let connection = handle.id();

        let superseded = match self.registry.entry(&username) {
            Entry::Occupied(mut entry) => {
                self.seed(&username, chats);
                Some(entry.insert(handle))
            }
            Entry::Vacant(entry) => {
                let reserved = self
                    .live
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                        (live < self.capacity).then_some(live + 1)
                    })
                    .is_ok();
                if !reserved {
                    warn!(
                        user = %username,
                        capacity = self.capacity,
                        "Refusing connection at capacity"
                    );
                    return Err(HandshakeError::CapacityReached);
                }
                self.seed(&username, chats);
                entry.insert(handle);
                None
            }
        };

        if let Some(previous) = &superseded {
            info!(
                user = %username,
                connection = %connection,
                previous = %previous.id(),
                "Superseding existing connection"
            );
            previous.close(close_code::POLICY, SUPERSEDED_REASON);
        }

        debug!(user = %username, connection = %connection, chats = chats.len(), "Admitted");
        Ok(superseded)
    }

    fn seed(&self, username: &str, chats: &[ChatId]) {
        for chat in chats {
            self.memberships.join(chat, username);
        }
    }

    /// Tear down a closed connection.
    ///
    /// If `connection` is still the user's current connection, unregisters it
    /// and removes the username from every chat. A superseded connection's
    /// teardown leaves the newer session untouched.
    ///
    /// Returns `true` if state was removed.
    pub fn teardown(&self, username: &str, connection: ConnectionId) -> bool {
        match self.registry.entry(username) {
            Entry::Occupied(entry) if entry.get().id() == connection => {
                let left = self.memberships.purge(username);
                entry.remove();
                self.live.fetch_sub(1, Ordering::AcqRel);
                debug!(
                    user = %username,
                    connection = %connection,
                    chats = left.len(),
                    "Torn down"
                );
                true
            }
            _ => {
                debug!(
                    user = %username,
                    connection = %connection,
                    "Teardown of superseded connection"
                );
                false
            }
        }
    }

    /// Add the user of `connection` to a chat.
    ///
    /// Returns `None` without touching the table if `connection` is no longer
    /// the user's current connection, otherwise whether the user was added.
    pub fn join(&self, chat: &str, username: &str, connection: ConnectionId) -> Option<bool> {
        self.while_current(username, connection, || self.memberships.join(chat, username))
    }

    /// Remove the user of `connection` from a chat.
    ///
    /// Returns `None` without touching the table if `connection` is no longer
    /// the user's current connection, otherwise whether the user was removed.
    pub fn leave(&self, chat: &str, username: &str, connection: ConnectionId) -> Option<bool> {
        self.while_current(username, connection, || self.memberships.leave(chat, username))
    }

    /// Run `mutate` under the user's registry entry lock if `connection` is
    /// current. `mutate` must not touch the registry.
    fn while_current<T>(
        &self,
        username: &str,
        connection: ConnectionId,
        mutate: impl FnOnce() -> T,
    ) -> Option<T> {
        match self.registry.entry(username) {
            Entry::Occupied(entry) if entry.get().id() == connection => {
                let value = mutate();
                drop(entry);
                Some(value)
            }
            _ => None,
        }
    }

    /// Snapshot of a chat's members.
    #[must_use]
    pub fn members(&self, chat: &str) -> Vec<String> {
        self.memberships.members(chat)
    }

    /// Deliver an event to every live member of a chat.
    ///
    /// The event is serialized once and shared by every recipient. Members
    /// without a connection on this relay are skipped.
    ///
    /// Returns the number of connections the event was queued on.
    pub fn broadcast(&self, chat: &str, event: &RelayEvent) -> usize {
        let frame: Arc<str> = match codec::encode(event) {
            Ok(text) => text.into(),
            Err(e) => {
                error!(chat = %chat, error = %e, "Failed to encode event");
                return 0;
            }
        };

        let members = self.memberships.members(chat);
        let delivered = members
            .iter()
            .filter(|username| {
                self.registry
                    .deliver(username, Outbound::Event(Arc::clone(&frame)))
            })
            .count();

        trace!(
            chat = %chat,
            action = %event.action(),
            members = members.len(),
            recipients = delivered,
            "Broadcast"
        );
        delivered
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            chats: self.memberships.chat_count(),
            memberships: self.memberships.membership_count(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Number of live connections.
    pub connections: usize,
    /// Number of chats with at least one member.
    pub chats: usize,
    /// Total (chat, username) pairs.
    pub memberships: usize,
}
