//! Presence broadcaster.
//!
//! Owns the [`PresenceRegistry`] together with the set of every admitted
//! connection. Each registry mutation and the broadcast of the resulting
//! online set happen under one lock, so broadcasts leave in the same order
//! the mutations were applied. Pushing to a connection only enqueues onto
//! its unbounded outbox, so the lock is never held across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use chatline_shared::{ConnectionId, ServerEvent, UserId};

use crate::registry::{ConnectionHandle, PresenceRegistry};

#[derive(Default)]
struct PresenceState {
    registry: PresenceRegistry,
    /// Every admitted connection, registered or not. All of them receive
    /// online-set broadcasts.
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl PresenceState {
    fn broadcast_online(&self) {
        let online = self.registry.list_online();
        for conn in self.connections.values() {
            if !conn.push(ServerEvent::OnlineUsers(online.clone())) {
                debug!(conn = %conn.id, "Skipping broadcast to closed connection");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Presence {
    state: Arc<Mutex<PresenceState>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a freshly authenticated connection: it starts receiving
    /// broadcasts and becomes the user's registered connection.
    pub fn connect(&self, handle: &ConnectionHandle) {
        let mut state = self.state.lock();
        state.connections.insert(handle.id, handle.clone());
        register(&mut state, handle);
    }

    /// Explicit "I am online" from a connection that is already admitted.
    pub fn declare_online(&self, handle: &ConnectionHandle) {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&handle.id) {
            debug!(conn = %handle.id, "Ignoring presence from detached connection");
            return;
        }
        register(&mut state, handle);
    }

    /// Explicit "I am offline". Only takes the user offline if this
    /// connection is the registered one.
    pub fn declare_offline(&self, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        unregister_if_current(&mut state, handle)
    }

    /// Connection teardown. Runs once per connection.
    ///
    /// Returns whether the user went offline as a result.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        state.connections.remove(&handle.id);
        let removed = unregister_if_current(&mut state, handle);
        if !removed {
            debug!(
                user = %handle.user_id,
                conn = %handle.id,
                "Disconnect of non-current connection leaves presence unchanged"
            );
        }
        removed
    }

    /// The user's current live connection, looked up at call time.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.state.lock().registry.lookup(user_id).cloned()
    }

    /// Push an event to a user's live connection if they are online.
    pub fn push_to(&self, user_id: &UserId, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(conn) => conn.push(event),
            None => false,
        }
    }

    pub fn list_online(&self) -> Vec<UserId> {
        self.state.lock().registry.list_online()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.state.lock().registry.is_online(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

fn register(state: &mut PresenceState, handle: &ConnectionHandle) {
    if let Some(previous) = state.registry.register(handle.clone()) {
        info!(
            user = %handle.user_id,
            previous = %previous.id,
            conn = %handle.id,
            "Newer connection supersedes registered one"
        );
    } else {
        debug!(user = %handle.user_id, conn = %handle.id, "User registered online");
    }
    state.broadcast_online();
}

fn unregister_if_current(state: &mut PresenceState, handle: &ConnectionHandle) -> bool {
    if state
        .registry
        .unregister_if_current(&handle.user_id, handle.id)
    {
        debug!(user = %handle.user_id, conn = %handle.id, "User went offline");
        state.broadcast_online();
        true
    } else {
        false
    }
}
