//! Ephemeral interaction channel.
//!
//! Relays typing state and delivery/read acknowledgements from one live
//! connection to another. The receiver is looked up in the presence registry
//! at relay time. Offline receivers are not an error: the signal is dropped
//! and never queued or retried.

use std::sync::Arc;

use tracing::{debug, warn};

use chatline_shared::protocol::{AckPayload, StatusPayload, TypingPayload};
use chatline_shared::{MessageStatus, ServerEvent, UserId};
use chatline_store::MessageStore;

use crate::presence::Presence;

#[derive(Clone)]
pub struct InteractionRelay {
    presence: Presence,
    messages: Arc<dyn MessageStore>,
}

impl InteractionRelay {
    pub fn new(presence: Presence, messages: Arc<dyn MessageStore>) -> Self {
        Self { presence, messages }
    }

    /// Forward `from`'s typing state to `receiver`. Returns whether it was
    /// handed to a live connection.
    pub fn relay_typing(&self, from: &UserId, receiver: &UserId, is_typing: bool) -> bool {
        if from == receiver {
            return false;
        }
        let delivered = self.presence.push_to(
            receiver,
            ServerEvent::Typing(TypingPayload {
                peer_id: from.clone(),
                is_typing,
            }),
        );
        if !delivered {
            debug!(from = %from, to = %receiver, "Typing signal dropped, receiver offline");
        }
        delivered
    }

    /// Tell the original sender that `acker` received or read a message.
    ///
    /// The relay itself is fire-and-forget. The status flag is also advanced
    /// in the message store in the background; a failure there is logged and
    /// otherwise ignored.
    pub fn acknowledge(&self, acker: &UserId, ack: AckPayload, status: MessageStatus) -> bool {
        if status == MessageStatus::Sent || acker == &ack.peer_id {
            return false;
        }

        let relayed = self.presence.push_to(
            &ack.peer_id,
            ServerEvent::MessageStatus(StatusPayload {
                message_id: ack.message_id,
                peer_id: acker.clone(),
                status,
            }),
        );
        if !relayed {
            debug!(
                message = %ack.message_id,
                sender = %ack.peer_id,
                status = status.as_str(),
                "Status signal dropped, sender offline"
            );
        }

        let messages = self.messages.clone();
        let acker = acker.clone();
        let message_id = ack.message_id;
        tokio::spawn(async move {
            if let Err(e) = messages.mark_status(message_id, &acker, status).await {
                warn!(message = %message_id, error = %e, "Failed to record message status");
            }
        });

        relayed
    }
}
