use serde::Serialize;
use tokio::sync::mpsc;

use chatline_shared::{ClientEvent, UserId};

/// A message arrived for a conversation that is not open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub sender_id: UserId,
    pub sender_name: String,
    pub preview: String,
}

/// Side effects the synchronization store asks its owner to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a frame over the live connection.
    Send(ClientEvent),
    /// Surface a non-blocking notification.
    Notify(Notification),
}

pub fn emit_event(outbound: &mpsc::UnboundedSender<ClientEvent>, event: ClientEvent) {
    let name = event.name();
    if outbound.send(event).is_err() {
        tracing::debug!(event = name, "Live connection gone, dropping event");
    }
}

pub fn emit_effects(
    effects: Vec<Effect>,
    outbound: &mpsc::UnboundedSender<ClientEvent>,
    notifications: &mpsc::UnboundedSender<Notification>,
) {
    for effect in effects {
        match effect {
            Effect::Send(event) => emit_event(outbound, event),
            Effect::Notify(notification) => {
                if notifications.send(notification).is_err() {
                    tracing::error!("Notification receiver dropped");
                }
            }
        }
    }
}
