//! Outbound typing debouncer.
//!
//! The first keystroke announces `isTyping: true`. After a second without
//! keystrokes, or when the message is sent, `isTyping: false` goes out once.

use std::time::{Duration, Instant};

use chatline_shared::constants::TYPING_IDLE_SECS;
use chatline_shared::protocol::TypingUpdate;
use chatline_shared::{ClientEvent, UserId};

#[derive(Debug)]
pub struct TypingDebouncer {
    idle: Duration,
    /// Receiver currently told we are typing, and when we last typed.
    active: Option<(UserId, Instant)>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(Duration::from_secs(TYPING_IDLE_SECS))
    }
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self { idle, active: None }
    }

    /// Record a keystroke in the conversation with `receiver`.
    ///
    /// Switching receivers mid-burst stops the old one first.
    pub fn keystroke(&mut self, receiver: &UserId, now: Instant) -> Vec<ClientEvent> {
        if let Some((current, last)) = &mut self.active {
            if current == receiver {
                *last = now;
                return Vec::new();
            }
        }
        let mut out: Vec<ClientEvent> = self.stop().into_iter().collect();
        out.push(typing(receiver.clone(), true));
        self.active = Some((receiver.clone(), now));
        out
    }

    /// Called periodically; clears the state once the idle window passes.
    pub fn tick(&mut self, now: Instant) -> Option<ClientEvent> {
        match &self.active {
            Some((_, last)) if now.duration_since(*last) >= self.idle => self.stop(),
            _ => None,
        }
    }

    /// Message sent or conversation left.
    pub fn stop(&mut self) -> Option<ClientEvent> {
        self.active
            .take()
            .map(|(receiver, _)| typing(receiver, false))
    }
}

fn typing(receiver_id: UserId, is_typing: bool) -> ClientEvent {
    ClientEvent::Typing(TypingUpdate {
        receiver_id,
        is_typing,
    })
}
