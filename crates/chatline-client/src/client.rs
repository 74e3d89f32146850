//! Ties the synchronization store to the server: history loads and sends go
//! through a [`ChatApi`], and the resulting effects are fed to the live
//! connection and the notification channel.
//!
//! Loads and sends are split in two. The synchronous half updates the store
//! and hands back a request that owns everything it needs, so the client
//! stays free to apply pushed events and render while the request is in
//! flight. The outcome is then fed back through the matching `complete_*`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::{ClientEvent, Message, UserId};

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::events::{emit_effects, emit_event, Effect, Notification};
use crate::live::LiveUpdate;
use crate::state::{LoadTicket, PendingId, SyncStore};
use crate::typing::TypingDebouncer;

/// A history fetch started by [`ChatClient::open_conversation`].
pub struct HistoryRequest<A> {
    api: Arc<A>,
    peer: UserId,
    ticket: LoadTicket,
}

pub struct HistoryOutcome {
    ticket: LoadTicket,
    result: Result<Vec<Message>>,
}

impl<A: ChatApi> HistoryRequest<A> {
    pub async fn fetch(self) -> HistoryOutcome {
        HistoryOutcome {
            ticket: self.ticket,
            result: self.api.get_messages(&self.peer).await,
        }
    }
}

/// A send started by [`ChatClient::begin_send`].
pub struct SendRequest<A> {
    api: Arc<A>,
    receiver: UserId,
    content: SendMessageRequest,
    pending: PendingId,
}

pub struct SendOutcome {
    pending: PendingId,
    result: Result<Message>,
}

impl<A: ChatApi> SendRequest<A> {
    pub async fn submit(self) -> SendOutcome {
        SendOutcome {
            pending: self.pending,
            result: self.api.send_message(&self.receiver, self.content).await,
        }
    }
}

pub struct ChatClient<A: ChatApi> {
    api: Arc<A>,
    store: SyncStore,
    typing: TypingDebouncer,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl<A: ChatApi> ChatClient<A> {
    pub fn new(
        me: UserId,
        api: A,
        outbound: mpsc::UnboundedSender<ClientEvent>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            api: Arc::new(api),
            store: SyncStore::new(me),
            typing: TypingDebouncer::default(),
            outbound,
            notifications,
        }
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Point outbound frames at a new live session after a reconnect.
    pub fn set_outbound(&mut self, outbound: mpsc::UnboundedSender<ClientEvent>) {
        self.outbound = outbound;
    }

    pub async fn refresh_users(&mut self) -> Result<()> {
        let users = self.api.list_users().await?;
        self.store.set_users(users);
        Ok(())
    }

    pub fn open_conversation(&mut self, peer: UserId) -> HistoryRequest<A> {
        self.stop_typing();
        let ticket = self.store.open_conversation(peer.clone());
        HistoryRequest {
            api: self.api.clone(),
            peer,
            ticket,
        }
    }

    /// Apply a finished history fetch. Outcomes for a conversation the user
    /// has already left are dropped by the store.
    pub fn complete_load(&mut self, outcome: HistoryOutcome) -> Result<()> {
        match outcome.result {
            Ok(history) => {
                let effects = self.store.finish_loading(outcome.ticket, history);
                self.emit(effects);
                Ok(())
            }
            Err(e) => {
                self.store.fail_loading(outcome.ticket, e.to_string());
                Err(e)
            }
        }
    }

    /// Start a send to the open conversation. The message shows up at once
    /// as unconfirmed.
    pub fn begin_send(&mut self, content: SendMessageRequest) -> Result<SendRequest<A>> {
        let receiver = self
            .store
            .active_peer()
            .cloned()
            .ok_or(ClientError::NoConversation)?;
        let pending = self
            .store
            .begin_send(&content)
            .ok_or(ClientError::NoConversation)?;
        self.stop_typing();
        Ok(SendRequest {
            api: self.api.clone(),
            receiver,
            content,
            pending,
        })
    }

    /// Confirm the unconfirmed entry, or retract it if the server refused.
    pub fn complete_send(&mut self, outcome: SendOutcome) -> Result<Message> {
        match outcome.result {
            Ok(message) => {
                self.store.confirm_send(outcome.pending, message.clone());
                Ok(message)
            }
            Err(e) => {
                self.store.fail_send(outcome.pending, e.to_string());
                Err(e)
            }
        }
    }

    pub fn keystroke(&mut self, now: Instant) {
        let Some(peer) = self.store.active_peer().cloned() else {
            return;
        };
        for event in self.typing.keystroke(&peer, now) {
            emit_event(&self.outbound, event);
        }
    }

    /// Periodic housekeeping for both typing directions.
    pub fn tick(&mut self, now: Instant) -> Vec<UserId> {
        if let Some(stop) = self.typing.tick(now) {
            emit_event(&self.outbound, stop);
        }
        self.store.expire_typing(now)
    }

    pub fn handle(&mut self, update: LiveUpdate, now: Instant) {
        match update {
            LiveUpdate::Event(event) => {
                debug!(event = event.name(), "Applying server event");
                let effects = self.store.apply_event(event, now);
                self.emit(effects);
            }
            LiveUpdate::Disconnected => self.store.on_disconnected(),
        }
    }

    fn stop_typing(&mut self) {
        if let Some(stop) = self.typing.stop() {
            emit_event(&self.outbound, stop);
        }
    }

    fn emit(&self, effects: Vec<Effect>) {
        emit_effects(effects, &self.outbound, &self.notifications);
    }
}
