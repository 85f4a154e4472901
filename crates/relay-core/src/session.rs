//! Per-connection action processing.
//!
//! A [`Session`] exists for every admitted connection and is the only thing
//! that acts on that connection's inbound events. It has a single open state;
//! dropping it closes the session and tears down the user's registry entry
//! and memberships exactly once, whether the connection ended cleanly, with
//! an error, or because its task was cancelled.
//!
//! Per-event ordering:
//!
//! | Event   | Membership          | Broadcast            | Side effect      |
//! |---------|---------------------|----------------------|------------------|
//! | MESSAGE | unchanged           | current members      | persist message  |
//! | JOIN    | add, then ...       | members incl. joiner | record join      |
//! | LEAVE   | ... remove after    | members incl. leaver | record leave     |
//!
//! Once a newer connection for the same username has been admitted, the old
//! session's events are dropped. Membership changes are applied only while
//! the session's connection is still current.

use crate::dispatch::Dispatcher;
use crate::gate::{Credentials, HandshakeError};
use crate::hub::Hub;
use crate::registry::{ConnectionHandle, ConnectionId, Outbound};
use crate::services::ChatDirectory;
use dirc_relay_protocol::{codec, now_timestamp, Action, ChatId, ClientEvent, RelayEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// An open relay session for one authenticated connection.
pub struct Session {
    credentials: Credentials,
    connection: ConnectionId,
    hub: Arc<Hub>,
    chats: Arc<dyn ChatDirectory>,
    dispatcher: Dispatcher,
    max_event_size: usize,
}

impl Session {
    /// Admit a connection into the hub and open its session.
    ///
    /// `memberships` are the chats returned by the bootstrapper. Returns the
    /// session and the receiving end of the connection's outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::CapacityReached`] if the hub is full.
    pub fn open(
        credentials: Credentials,
        memberships: &[ChatId],
        hub: Arc<Hub>,
        chats: Arc<dyn ChatDirectory>,
        dispatcher: Dispatcher,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Outbound>), HandshakeError> {
        let (handle, rx) = ConnectionHandle::new(credentials.username());
        let connection = handle.id();
        hub.admit(handle, memberships)?;

        info!(user = %credentials.username(), connection = %connection, "Session opened");

        let session = Self {
            credentials,
            connection,
            hub,
            chats,
            dispatcher,
            max_event_size: codec::MAX_EVENT_SIZE,
        };
        Ok((session, rx))
    }

    /// Override the inbound event size limit.
    #[must_use]
    pub fn with_max_event_size(mut self, max_event_size: usize) -> Self {
        self.max_event_size = max_event_size;
        self
    }

    /// The session's username.
    #[must_use]
    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    /// The session's connection ID.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Decode and process a raw inbound frame.
    ///
    /// Malformed frames are logged and dropped; the session stays open.
    /// Returns the event's action and the number of recipients, or `None` if
    /// the frame was dropped.
    pub fn handle_frame(&self, data: &[u8]) -> Option<(Action, usize)> {
        match codec::decode_with_limit(data, self.max_event_size) {
            Ok(event) => {
                let action = event.action();
                Some((action, self.handle(event)))
            }
            Err(e) => {
                warn!(
                    user = %self.username(),
                    connection = %self.connection,
                    error = %e,
                    "Dropping malformed event"
                );
                None
            }
        }
    }

    /// Process one inbound event.
    ///
    /// Returns the number of connections the resulting broadcast reached.
    /// Events from a superseded connection reach nobody.
    pub fn handle(&self, event: ClientEvent) -> usize {
        let username = self.credentials.username();
        if !self.hub.registry().is_current(username, self.connection) {
            return self.superseded(event.action());
        }

        let outbound = RelayEvent::from_client(event, username, now_timestamp());

        let delivered = match &outbound {
            RelayEvent::Message { chat, content, .. } => {
                let delivered = self.hub.broadcast(chat, &outbound);
                self.persist_message(chat.clone(), content.clone());
                delivered
            }
            RelayEvent::Join { chat, .. } => {
                if self.hub.join(chat, username, self.connection).is_none() {
                    return self.superseded(Action::Join);
                }
                let delivered = self.hub.broadcast(chat, &outbound);
                self.record_join(chat.clone());
                delivered
            }
            RelayEvent::Leave { chat, .. } => {
                let delivered = self.hub.broadcast(chat, &outbound);
                if self.hub.leave(chat, username, self.connection).is_none() {
                    self.superseded(Action::Leave);
                    return delivered;
                }
                self.record_leave(chat.clone());
                delivered
            }
        };

        debug!(
            user = %username,
            chat = %outbound.chat(),
            action = %outbound.action(),
            recipients = delivered,
            "Processed event"
        );
        delivered
    }

    fn superseded(&self, action: Action) -> usize {
        debug!(
            user = %self.username(),
            connection = %self.connection,
            action = %action,
            "Dropping event from superseded connection"
        );
        0
    }

    fn persist_message(&self, chat: ChatId, content: String) {
        let chats = Arc::clone(&self.chats);
        let token = self.credentials.token().to_string();
        self.dispatcher.dispatch("persist_message", async move {
            chats.send_message(&token, &chat, &content).await
        });
    }

    fn record_join(&self, chat: ChatId) {
        let chats = Arc::clone(&self.chats);
        let token = self.credentials.token().to_string();
        self.dispatcher.dispatch("record_join", async move {
            chats.record_join(&token, &chat).await
        });
    }

    fn record_leave(&self, chat: ChatId) {
        let chats = Arc::clone(&self.chats);
        let token = self.credentials.token().to_string();
        self.dispatcher.dispatch("record_leave", async move {
            chats.record_leave(&token, &chat).await
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let removed = self.hub.teardown(self.credentials.username(), self.connection);
        info!(
            user = %self.credentials.username(),
            connection = %self.connection,
            removed,
            "Session closed"
        );
    }
}
