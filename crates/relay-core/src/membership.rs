//! Membership table for the relay.
//!
//! Tracks which usernames are subscribed to which chats on this relay
//! instance. Chat entries are created lazily and deleted as soon as their last
//! member leaves, so the table never holds an empty set.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dirc_relay_protocol::ChatId;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Chat identifier to the set of subscribed usernames.
///
/// Every mutation happens under the DashMap shard lock for the chat it
/// touches, so concurrent joins and leaves on one chat never lose updates.
#[derive(Debug, Default)]
pub struct MembershipTable {
    chats: DashMap<ChatId, HashSet<String>>,
}

impl MembershipTable {
    /// Create an empty membership table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a username to a chat, creating the chat entry if absent.
    ///
    /// Returns `true` if the username was not already a member.
    pub fn join(&self, chat: &str, username: &str) -> bool {
        let mut members = self.chats.entry(chat.to_string()).or_insert_with(|| {
            debug!(chat = %chat, "Creating chat entry");
            HashSet::new()
        });

        let inserted = members.insert(username.to_string());
        trace!(chat = %chat, user = %username, members = members.len(), inserted, "Join");
        inserted
    }

    /// Remove a username from a chat, deleting the chat entry if it empties.
    ///
    /// Returns `true` if the username was a member.
    pub fn leave(&self, chat: &str, username: &str) -> bool {
        match self.chats.entry(chat.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(username);
                if entry.get().is_empty() {
                    entry.remove();
                    debug!(chat = %chat, "Deleted empty chat entry");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Remove a username from every chat.
    ///
    /// Returns the chats the username was removed from.
    pub fn purge(&self, username: &str) -> Vec<ChatId> {
        let mut left = Vec::new();

        self.chats.retain(|chat, members| {
            if members.remove(username) {
                left.push(chat.clone());
            }
            !members.is_empty()
        });

        debug!(user = %username, chats = left.len(), "Purged memberships");
        left
    }

    /// Snapshot of a chat's current members.
    #[must_use]
    pub fn members(&self, chat: &str) -> Vec<String> {
        self.chats
            .get(chat)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a username is a member of a chat.
    #[must_use]
    pub fn contains(&self, chat: &str, username: &str) -> bool {
        self.chats
            .get(chat)
            .is_some_and(|members| members.contains(username))
    }

    /// Check whether a chat has an entry.
    #[must_use]
    pub fn exists(&self, chat: &str) -> bool {
        self.chats.contains_key(chat)
    }

    /// Number of chats with at least one member.
    #[must_use]
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Total number of (chat, username) pairs.
    #[must_use]
    pub fn membership_count(&self) -> usize {
        self.chats.iter().map(|entry| entry.len()).sum()
    }
}
