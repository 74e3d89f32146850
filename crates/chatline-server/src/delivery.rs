//! Message delivery coordinator.
//!
//! Two paths per message: the persisted message goes back to the sender as
//! the synchronous result of the send, and independently a `newMessage` push
//! goes to the receiver's live connection when one is registered. The sender
//! never gets a push for its own message.

use std::sync::Arc;

use tracing::{debug, info};

use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::{Message, ServerEvent, UserId};
use chatline_store::{MessageStore, StoreError};

use crate::presence::Presence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the receiver's live connection.
    Pushed,
    /// Receiver not registered; history fetch is the only path.
    Offline,
    /// Receiver's connection was registered but its writer had already gone.
    Lost,
    /// Sender and receiver are the same user; nothing to push.
    SelfAddressed,
}

#[derive(Clone)]
pub struct DeliveryCoordinator {
    presence: Presence,
    messages: Arc<dyn MessageStore>,
}

impl DeliveryCoordinator {
    pub fn new(presence: Presence, messages: Arc<dyn MessageStore>) -> Self {
        Self { presence, messages }
    }

    /// Persist a message and, once stored, push it to the receiver.
    ///
    /// A persistence failure is returned to the sender and nothing is pushed.
    pub async fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: SendMessageRequest,
    ) -> Result<Message, StoreError> {
        let message = self.messages.persist_message(sender, receiver, content).await?;
        let outcome = self.dispatch(&message);
        info!(
            msg_id = %message.id,
            from = %message.sender_id,
            to = %message.receiver_id,
            outcome = ?outcome,
            "Message sent"
        );
        Ok(message)
    }

    /// Push an already persisted message to its receiver, if online.
    pub fn dispatch(&self, message: &Message) -> PushOutcome {
        if message.receiver_id == message.sender_id {
            return PushOutcome::SelfAddressed;
        }

        let Some(conn) = self.presence.lookup(&message.receiver_id) else {
            debug!(msg_id = %message.id, to = %message.receiver_id, "Receiver offline, no push");
            return PushOutcome::Offline;
        };

        if conn.push(ServerEvent::NewMessage(message.clone())) {
            PushOutcome::Pushed
        } else {
            debug!(msg_id = %message.id, conn = %conn.id, "Receiver connection closed mid-push");
            PushOutcome::Lost
        }
    }
}
