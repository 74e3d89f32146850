//! Client synchronization store.
//!
//! Holds everything the UI renders: the online set, the open conversation,
//! unread counters, typing indicators and send state. It performs no I/O.
//! Each operation returns the [`Effect`]s its owner must carry out, and
//! time-dependent behavior takes the current instant from the caller.
//!
//! Exactly one conversation is active at a time. Pushed events are routed
//! against the active counterpart when they are applied, so switching
//! conversations needs no listener bookkeeping and an event can never land
//! in a conversation it does not belong to.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use chatline_shared::constants::TYPING_TIMEOUT_SECS;
use chatline_shared::protocol::{AckPayload, SendMessageRequest, StatusPayload, TypingPayload};
use chatline_shared::{ClientEvent, Message, MessageId, MessageStatus, ServerEvent, UserId, UserProfile};

use crate::events::{Effect, Notification};

/// Identifies one history load. Loads are numbered in the order they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// Identifies one optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading { peer: UserId, ticket: LoadTicket },
    Loaded { peer: UserId },
}

/// One row in the visible message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub message: Message,
    /// Set while the send round trip is still in flight.
    pub pending: Option<PendingId>,
}

impl Entry {
    pub fn is_confirmed(&self) -> bool {
        self.pending.is_none()
    }
}

#[derive(Debug)]
pub struct SyncStore {
    me: UserId,
    users: HashMap<UserId, UserProfile>,
    phase: Phase,
    next_ticket: u64,
    next_pending: u64,
    entries: Vec<Entry>,
    online: BTreeSet<UserId>,
    unread: HashMap<UserId, usize>,
    last_message: HashMap<UserId, Message>,
    /// Peer -> instant their typing indicator lapses.
    typing: HashMap<UserId, Instant>,
    typing_timeout: Duration,
    last_error: Option<String>,
}

impl SyncStore {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            users: HashMap::new(),
            phase: Phase::Idle,
            next_ticket: 0,
            next_pending: 0,
            entries: Vec::new(),
            online: BTreeSet::new(),
            unread: HashMap::new(),
            last_message: HashMap::new(),
            typing: HashMap::new(),
            typing_timeout: Duration::from_secs(TYPING_TIMEOUT_SECS),
            last_error: None,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    // -----------------------------------------------------------------------
    // Users and presence
    // -----------------------------------------------------------------------

    pub fn set_users(&mut self, users: Vec<UserProfile>) {
        self.users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
    }

    pub fn user(&self, id: &UserId) -> Option<&UserProfile> {
        self.users.get(id)
    }

    pub fn is_online(&self, id: &UserId) -> bool {
        self.online.contains(id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.online.iter().cloned().collect()
    }

    /// The live connection dropped; presence is no longer known.
    pub fn on_disconnected(&mut self) {
        self.online.clear();
        self.typing.clear();
    }

    // -----------------------------------------------------------------------
    // Conversation lifecycle
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn active_peer(&self) -> Option<&UserId> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Loading { peer, .. } | Phase::Loaded { peer } => Some(peer),
        }
    }

    /// Switch to the conversation with `peer` and start loading its history.
    ///
    /// Whatever was visible for the previous conversation is dropped,
    /// including optimistic entries whose sends are still in flight.
    pub fn open_conversation(&mut self, peer: UserId) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.entries.clear();
        self.unread.remove(&peer);
        debug!(peer = %peer, ticket = ticket.0, "Opening conversation");
        self.phase = Phase::Loading { peer, ticket };
        ticket
    }

    pub fn close_conversation(&mut self) {
        self.entries.clear();
        self.phase = Phase::Idle;
    }

    fn is_current_load(&self, ticket: LoadTicket) -> bool {
        matches!(&self.phase, Phase::Loading { ticket: t, .. } if *t == ticket)
    }

    /// History arrived. Discarded when the user has since moved on.
    ///
    /// Entries that arrived by push or optimistic send during the load are
    /// kept after the history unless the history already contains them.
    /// Every inbound message not yet read is acknowledged as read.
    pub fn finish_loading(&mut self, ticket: LoadTicket, history: Vec<Message>) -> Vec<Effect> {
        if !self.is_current_load(ticket) {
            debug!(ticket = ticket.0, "Discarding stale history load");
            return Vec::new();
        }
        let Some(peer) = self.active_peer().cloned() else {
            return Vec::new();
        };

        let early = std::mem::take(&mut self.entries);
        self.entries = history
            .into_iter()
            .map(|message| Entry {
                message,
                pending: None,
            })
            .collect();
        for entry in early {
            let id = entry.message.id;
            match self.entries.iter_mut().find(|e| e.message.id == id) {
                // History may predate an ack sent during the load.
                Some(known) => {
                    known.message.status = known.message.status.advance(entry.message.status);
                }
                None => self.entries.push(entry),
            }
        }

        let mut effects = Vec::new();
        for entry in &mut self.entries {
            let m = &mut entry.message;
            if m.sender_id == peer && m.status < MessageStatus::Read {
                m.status = MessageStatus::Read;
                effects.push(Effect::Send(ClientEvent::Read(AckPayload {
                    message_id: m.id,
                    peer_id: peer.clone(),
                })));
            }
        }

        if let Some(last) = self.entries.iter().rev().find(|e| e.is_confirmed()) {
            self.last_message.insert(peer.clone(), last.message.clone());
        }
        self.phase = Phase::Loaded { peer };
        effects
    }

    /// History fetch failed. Leaves the conversation closed.
    pub fn fail_loading(&mut self, ticket: LoadTicket, error: String) {
        if !self.is_current_load(ticket) {
            return;
        }
        warn!(error = %error, "Failed to load conversation");
        self.last_error = Some(error);
        self.close_conversation();
    }

    pub fn messages(&self) -> &[Entry] {
        &self.entries
    }

    fn contains(&self, id: MessageId) -> bool {
        self.entries.iter().any(|e| e.message.id == id)
    }

    pub fn unread(&self, peer: &UserId) -> usize {
        self.unread.get(peer).copied().unwrap_or(0)
    }

    pub fn last_message(&self, peer: &UserId) -> Option<&Message> {
        self.last_message.get(peer)
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Append an unconfirmed entry to the open conversation before the send
    /// request goes out. Returns `None` when no conversation is open.
    pub fn begin_send(&mut self, content: &SendMessageRequest) -> Option<PendingId> {
        let peer = self.active_peer()?.clone();
        self.next_pending += 1;
        let pending = PendingId(self.next_pending);
        self.entries.push(Entry {
            message: Message {
                id: MessageId::new(),
                sender_id: self.me.clone(),
                receiver_id: peer,
                text: content.text.clone(),
                image: content.image.clone(),
                created_at: Utc::now(),
                status: MessageStatus::Sent,
            },
            pending: Some(pending),
        });
        Some(pending)
    }

    /// The server accepted the send. The optimistic entry becomes the
    /// persisted message in place.
    pub fn confirm_send(&mut self, pending: PendingId, message: Message) {
        self.last_message
            .insert(message.counterpart(&self.me).clone(), message.clone());

        let Some(index) = self.entries.iter().position(|e| e.pending == Some(pending)) else {
            debug!(msg_id = %message.id, "Confirmed send no longer visible");
            return;
        };
        if self.contains(message.id) {
            self.entries.remove(index);
        } else {
            self.entries[index] = Entry {
                message,
                pending: None,
            };
        }
    }

    /// The send failed: retract the optimistic entry and surface the error.
    pub fn fail_send(&mut self, pending: PendingId, error: String) {
        self.entries.retain(|e| e.pending != Some(pending));
        warn!(error = %error, "Send failed");
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    // -----------------------------------------------------------------------
    // Pushed events
    // -----------------------------------------------------------------------

    pub fn apply_event(&mut self, event: ServerEvent, now: Instant) -> Vec<Effect> {
        match event {
            ServerEvent::OnlineUsers(users) => {
                self.online = users.into_iter().collect();
                Vec::new()
            }
            ServerEvent::NewMessage(message) => self.on_new_message(message),
            ServerEvent::Typing(payload) => {
                self.on_typing(payload, now);
                Vec::new()
            }
            ServerEvent::MessageStatus(payload) => {
                self.on_status(payload);
                Vec::new()
            }
            ServerEvent::Error(payload) => {
                warn!(error = %payload.message, "Server rejected a frame");
                self.last_error = Some(payload.message);
                Vec::new()
            }
        }
    }

    fn on_new_message(&mut self, mut message: Message) -> Vec<Effect> {
        if message.sender_id == self.me {
            debug!(msg_id = %message.id, "Dropping echo of own message");
            return Vec::new();
        }
        if self.contains(message.id) {
            debug!(msg_id = %message.id, "Dropping duplicate message");
            return Vec::new();
        }

        let sender = message.sender_id.clone();
        let mut effects = vec![Effect::Send(ClientEvent::Delivered(AckPayload {
            message_id: message.id,
            peer_id: sender.clone(),
        }))];

        if self.active_peer() == Some(&sender) {
            message.status = message.status.advance(MessageStatus::Read);
            effects.push(Effect::Send(ClientEvent::Read(AckPayload {
                message_id: message.id,
                peer_id: sender.clone(),
            })));
            self.last_message.insert(sender, message.clone());
            self.entries.push(Entry {
                message,
                pending: None,
            });
        } else {
            *self.unread.entry(sender.clone()).or_insert(0) += 1;
            let sender_name = self
                .users
                .get(&sender)
                .map(|u| u.fullname.clone())
                .unwrap_or_else(|| "Someone".to_string());
            effects.push(Effect::Notify(Notification {
                sender_id: sender.clone(),
                sender_name,
                preview: message.preview().to_string(),
            }));
            self.last_message.insert(sender, message);
        }
        effects
    }

    fn on_typing(&mut self, payload: TypingPayload, now: Instant) {
        if payload.peer_id == self.me {
            return;
        }
        if payload.is_typing {
            self.typing
                .insert(payload.peer_id, now + self.typing_timeout);
        } else {
            self.typing.remove(&payload.peer_id);
        }
    }

    /// Only the message's receiver can move its status.
    fn on_status(&mut self, payload: StatusPayload) {
        let acked_by_receiver =
            |m: &Message| m.id == payload.message_id && m.receiver_id == payload.peer_id;

        let mut applied = false;
        for entry in &mut self.entries {
            if acked_by_receiver(&entry.message) {
                entry.message.status = entry.message.status.advance(payload.status);
                applied = true;
            }
        }
        if let Some(last) = self.last_message.get_mut(&payload.peer_id) {
            if acked_by_receiver(&*last) {
                last.status = last.status.advance(payload.status);
                applied = true;
            }
        }
        if !applied {
            debug!(
                msg_id = %payload.message_id,
                from = %payload.peer_id,
                "Status update matched no message sent to that peer"
            );
        }
    }

    /// Whether `peer` is shown as typing at `now`.
    pub fn is_typing(&self, peer: &UserId, now: Instant) -> bool {
        self.typing.get(peer).is_some_and(|until| now < *until)
    }

    /// Drop lapsed typing indicators, returning the peers that reverted.
    pub fn expire_typing(&mut self, now: Instant) -> Vec<UserId> {
        let lapsed: Vec<UserId> = self
            .typing
            .iter()
            .filter(|(_, until)| now >= **until)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &lapsed {
            self.typing.remove(peer);
        }
        lapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_shared::protocol::ErrorPayload;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    fn message(from: &str, to: &str, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: uid(from),
            receiver_id: uid(to),
            text: Some(text.to_string()),
            image: None,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: uid(id),
            fullname: name.to_string(),
            email: format!("{id}@example.com"),
            profile_pic: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Alice's store with the conversation with bob loaded and empty.
    fn alice_with_bob_open() -> SyncStore {
        let mut store = SyncStore::new(uid("alice"));
        let ticket = store.open_conversation(uid("bob"));
        store.finish_loading(ticket, Vec::new());
        store
    }

    fn sent_events(effects: &[Effect]) -> Vec<&ClientEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_phase_transitions() {
        let mut store = SyncStore::new(uid("alice"));
        assert_eq!(store.phase(), &Phase::Idle);

        let ticket = store.open_conversation(uid("bob"));
        assert!(matches!(store.phase(), Phase::Loading { peer, .. } if peer == &uid("bob")));

        store.finish_loading(ticket, vec![message("bob", "alice", "hi")]);
        assert_eq!(store.phase(), &Phase::Loaded { peer: uid("bob") });
        assert_eq!(store.messages().len(), 1);

        store.open_conversation(uid("carol"));
        assert!(store.messages().is_empty());
        assert_eq!(store.active_peer(), Some(&uid("carol")));
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let mut store = SyncStore::new(uid("alice"));
        let bob_ticket = store.open_conversation(uid("bob"));
        let carol_ticket = store.open_conversation(uid("carol"));

        let effects = store.finish_loading(bob_ticket, vec![message("bob", "alice", "late")]);
        assert!(effects.is_empty());
        assert!(store.messages().is_empty());
        assert!(matches!(store.phase(), Phase::Loading { .. }));

        store.finish_loading(carol_ticket, vec![message("carol", "alice", "mine")]);
        assert_eq!(store.messages()[0].message.text.as_deref(), Some("mine"));
    }

    #[test]
    fn test_loading_acks_unread_inbound_as_read() {
        let mut store = SyncStore::new(uid("alice"));
        let ticket = store.open_conversation(uid("bob"));

        let mut already_read = message("bob", "alice", "old");
        already_read.status = MessageStatus::Read;
        let fresh = message("bob", "alice", "new");
        let own = message("alice", "bob", "reply");

        let effects = store.finish_loading(ticket, vec![already_read, fresh.clone(), own]);
        assert_eq!(
            sent_events(&effects),
            vec![&ClientEvent::Read(AckPayload {
                message_id: fresh.id,
                peer_id: uid("bob"),
            })]
        );
        assert!(store
            .messages()
            .iter()
            .filter(|e| e.message.sender_id == uid("bob"))
            .all(|e| e.message.status == MessageStatus::Read));
    }

    #[test]
    fn test_push_during_load_is_merged_once() {
        let mut store = SyncStore::new(uid("alice"));
        let ticket = store.open_conversation(uid("bob"));

        let pushed = message("bob", "alice", "racing");
        store.apply_event(ServerEvent::NewMessage(pushed.clone()), Instant::now());

        // History already includes the pushed message, still flagged as sent.
        let effects = store.finish_loading(ticket, vec![pushed.clone()]);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].message.id, pushed.id);
        assert_eq!(store.messages()[0].message.status, MessageStatus::Read);
        // The read ack already went out with the push.
        assert!(sent_events(&effects).is_empty());
    }

    #[test]
    fn test_push_to_open_conversation_appends_and_acks() {
        let mut store = alice_with_bob_open();
        let m = message("bob", "alice", "hey");

        let effects = store.apply_event(ServerEvent::NewMessage(m.clone()), Instant::now());

        let ack = AckPayload {
            message_id: m.id,
            peer_id: uid("bob"),
        };
        assert_eq!(
            sent_events(&effects),
            vec![&ClientEvent::Delivered(ack.clone()), &ClientEvent::Read(ack)]
        );
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].message.status, MessageStatus::Read);
        assert_eq!(store.unread(&uid("bob")), 0);
        assert_eq!(store.last_message(&uid("bob")).map(|m| m.id), Some(m.id));
    }

    #[test]
    fn test_push_elsewhere_counts_unread_and_notifies() {
        let mut store = alice_with_bob_open();
        store.set_users(vec![profile("carol", "Carol C")]);

        let from_carol = message("carol", "alice", "psst");
        let effects = store.apply_event(ServerEvent::NewMessage(from_carol), Instant::now());
        let mut image_only = message("dave", "alice", "");
        image_only.text = None;
        image_only.image = Some("data:image/png;base64,AAAA".into());
        let dave_effects = store.apply_event(ServerEvent::NewMessage(image_only), Instant::now());

        assert!(store.messages().is_empty());
        assert_eq!(store.unread(&uid("carol")), 1);
        assert!(effects.contains(&Effect::Notify(Notification {
            sender_id: uid("carol"),
            sender_name: "Carol C".into(),
            preview: "psst".into(),
        })));
        assert!(dave_effects.contains(&Effect::Notify(Notification {
            sender_id: uid("dave"),
            sender_name: "Someone".into(),
            preview: "Image".into(),
        })));

        store.open_conversation(uid("carol"));
        assert_eq!(store.unread(&uid("carol")), 0);
    }

    #[test]
    fn test_own_echo_and_duplicates_are_dropped() {
        let mut store = alice_with_bob_open();

        let echo = message("alice", "bob", "mine");
        assert!(store
            .apply_event(ServerEvent::NewMessage(echo), Instant::now())
            .is_empty());

        let m = message("bob", "alice", "once");
        store.apply_event(ServerEvent::NewMessage(m.clone()), Instant::now());
        assert!(store
            .apply_event(ServerEvent::NewMessage(m), Instant::now())
            .is_empty());
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_optimistic_send_confirmed_in_place() {
        let mut store = alice_with_bob_open();
        let content = SendMessageRequest::text("hello");

        let pending = store.begin_send(&content).unwrap();
        assert_eq!(store.messages().len(), 1);
        assert!(!store.messages()[0].is_confirmed());

        let persisted = message("alice", "bob", "hello");
        store.confirm_send(pending, persisted.clone());
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].message, persisted);
        assert!(store.messages()[0].is_confirmed());
        assert_eq!(store.last_message(&uid("bob")), Some(&persisted));

        // A late echo of the confirmed message changes nothing.
        store.apply_event(ServerEvent::NewMessage(persisted), Instant::now());
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_failed_send_is_retracted() {
        let mut store = alice_with_bob_open();
        let first = store.begin_send(&SendMessageRequest::text("ok")).unwrap();
        let second = store.begin_send(&SendMessageRequest::text("boom")).unwrap();

        store.fail_send(second, "Message must contain text or an image".into());
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].pending, Some(first));
        assert_eq!(store.take_error().as_deref(), Some("Message must contain text or an image"));
        assert!(store.last_error().is_none());
    }

    #[test]
    fn test_send_without_conversation() {
        let mut store = SyncStore::new(uid("alice"));
        assert!(store.begin_send(&SendMessageRequest::text("x")).is_none());
    }

    #[test]
    fn test_typing_expires_after_timeout() {
        let mut store = alice_with_bob_open();
        let t0 = Instant::now();
        let typing = |is_typing| {
            ServerEvent::Typing(TypingPayload {
                peer_id: uid("bob"),
                is_typing,
            })
        };

        store.apply_event(typing(true), t0);
        assert!(store.is_typing(&uid("bob"), t0));
        assert!(store.is_typing(&uid("bob"), t0 + Duration::from_millis(2900)));
        assert!(!store.is_typing(&uid("bob"), t0 + Duration::from_secs(3)));

        // A refresh extends the window.
        store.apply_event(typing(true), t0 + Duration::from_secs(2));
        assert!(store.is_typing(&uid("bob"), t0 + Duration::from_secs(4)));
        assert_eq!(store.expire_typing(t0 + Duration::from_secs(5)), vec![uid("bob")]);
        assert!(store.expire_typing(t0 + Duration::from_secs(6)).is_empty());

        store.apply_event(typing(true), t0);
        store.apply_event(typing(false), t0);
        assert!(!store.is_typing(&uid("bob"), t0));
    }

    #[test]
    fn test_presence_is_full_replace_and_idempotent() {
        let mut store = SyncStore::new(uid("alice"));
        let now = Instant::now();
        store.apply_event(
            ServerEvent::OnlineUsers(vec![uid("alice"), uid("bob"), uid("carol")]),
            now,
        );

        let set = ServerEvent::OnlineUsers(vec![uid("alice"), uid("bob")]);
        store.apply_event(set.clone(), now);
        let once = store.online_users();
        store.apply_event(set, now);
        assert_eq!(store.online_users(), once);
        assert!(!store.is_online(&uid("carol")));

        store.on_disconnected();
        assert!(store.online_users().is_empty());
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut store = alice_with_bob_open();
        let pending = store.begin_send(&SendMessageRequest::text("hi")).unwrap();
        let persisted = message("alice", "bob", "hi");
        store.confirm_send(pending, persisted.clone());

        let status = |status| {
            ServerEvent::MessageStatus(StatusPayload {
                message_id: persisted.id,
                peer_id: uid("bob"),
                status,
            })
        };
        store.apply_event(status(MessageStatus::Read), Instant::now());
        store.apply_event(status(MessageStatus::Delivered), Instant::now());

        assert_eq!(store.messages()[0].message.status, MessageStatus::Read);
        assert_eq!(
            store.last_message(&uid("bob")).map(|m| m.status),
            Some(MessageStatus::Read)
        );
    }

    #[test]
    fn test_status_from_third_party_is_ignored() {
        let mut store = alice_with_bob_open();
        let pending = store.begin_send(&SendMessageRequest::text("for bob")).unwrap();
        let persisted = message("alice", "bob", "for bob");
        store.confirm_send(pending, persisted.clone());

        store.apply_event(
            ServerEvent::MessageStatus(StatusPayload {
                message_id: persisted.id,
                peer_id: uid("carol"),
                status: MessageStatus::Read,
            }),
            Instant::now(),
        );

        assert_eq!(store.messages()[0].message.status, MessageStatus::Sent);
        assert_eq!(
            store.last_message(&uid("bob")).map(|m| m.status),
            Some(MessageStatus::Sent)
        );
    }

    #[test]
    fn test_server_error_is_surfaced() {
        let mut store = SyncStore::new(uid("alice"));
        store.apply_event(
            ServerEvent::Error(ErrorPayload {
                message: "Malformed frame".into(),
            }),
            Instant::now(),
        );
        assert_eq!(store.last_error(), Some("Malformed frame"));
    }
}
