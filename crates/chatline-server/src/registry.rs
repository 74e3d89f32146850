//! Presence registry.
//!
//! Maps each online user to the one live connection that currently speaks for
//! them. Presence is defined by membership alone: a user is online iff an
//! entry exists. The registry is plain in-memory data with no locking or I/O
//! of its own; [`crate::presence::Presence`] owns it behind a mutex so every
//! mutation is a single atomic step relative to lookups.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use chatline_shared::{ConnectionId, ServerEvent, UserId};

/// One admitted live connection.
///
/// Cloning is cheap; all clones share the same outbound queue, which the
/// connection's writer task drains in order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, outbox: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            created_at: Utc::now(),
            outbox,
        }
    }

    /// Queue an event for this connection. Never blocks.
    ///
    /// Returns `false` when the connection's writer is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for the handle's user (last connect
    /// wins). Returns the superseded handle, which is left open; registering
    /// the already-current connection again supersedes nothing.
    pub fn register(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let id = handle.id;
        self.entries
            .insert(handle.user_id.clone(), handle)
            .filter(|previous| previous.id != id)
    }

    /// Remove the entry for `user_id` unconditionally.
    pub fn unregister(&mut self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.entries.remove(user_id)
    }

    /// Remove the entry for `user_id` only if `connection` is still the one
    /// registered for that user.
    ///
    /// A disconnecting connection that was superseded by a newer one must not
    /// take the user offline.
    pub fn unregister_if_current(&mut self, user_id: &UserId, connection: ConnectionId) -> bool {
        match self.entries.get(user_id) {
            Some(current) if current.id == connection => {
                self.entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: &UserId) -> Option<&ConnectionHandle> {
        self.entries.get(user_id)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// The authoritative online set, sorted.
    pub fn list_online(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
