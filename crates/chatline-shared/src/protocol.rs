//! Wire contract of the live channel and the message model.
//!
//! Every live frame is a JSON text frame `{"event": <name>, "data": <payload>}`.
//! Durable data (`newMessage`) and fire-and-forget hints (`typing`,
//! `messageStatus`) travel as distinct event names so each side can apply its
//! own reliability policy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_IMAGE_BYTES, MAX_TEXT_BYTES};
use crate::error::ProtocolError;
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery state of a message. Only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Returns the later of the two states.
    pub fn advance(self, to: MessageStatus) -> MessageStatus {
        self.max(to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A persisted direct message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// The other participant, seen from `me`.
    pub fn counterpart(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Short human-readable preview used for notifications.
    pub fn preview(&self) -> &str {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => "Image",
        }
    }
}

/// Body of the send-message request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// Trim and validate the payload, returning the normalised request.
    ///
    /// Empty text is dropped; at least one of text or image must remain.
    pub fn normalise(self) -> Result<Self, ContentError> {
        let text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let image = self.image.filter(|i| !i.trim().is_empty());

        if text.is_none() && image.is_none() {
            return Err(ContentError::Empty);
        }

        if let Some(ref t) = text {
            if t.len() > MAX_TEXT_BYTES {
                return Err(ContentError::TextTooLarge {
                    size: t.len(),
                    max: MAX_TEXT_BYTES,
                });
            }
        }

        if let Some(ref i) = image {
            let size = decoded_image_len(i)?;
            if size > MAX_IMAGE_BYTES {
                return Err(ContentError::ImageTooLarge {
                    size,
                    max: MAX_IMAGE_BYTES,
                });
            }
        }

        Ok(Self { text, image })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("Message must contain text or an image")]
    Empty,

    #[error("Text too large: {size} bytes (max {max})")]
    TextTooLarge { size: usize, max: usize },

    #[error("Image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Image must be a base64 data:image URL")]
    InvalidImage,
}

/// Images travel as `data:image/<type>;base64,<payload>` URLs.
fn decoded_image_len(data_url: &str) -> Result<usize, ContentError> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or(ContentError::InvalidImage)?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or(ContentError::InvalidImage)?;
    STANDARD
        .decode(payload)
        .map(|bytes| bytes.len())
        .map_err(|_| ContentError::InvalidImage)
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub peer_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub message_id: MessageId,
    /// The user whose client produced the acknowledgement.
    pub peer_id: UserId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events pushed by the server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full current online set, broadcast to every connection.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    #[serde(rename = "newMessage")]
    NewMessage(Message),

    #[serde(rename = "typing")]
    Typing(TypingPayload),

    #[serde(rename = "messageStatus")]
    MessageStatus(StatusPayload),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "getOnlineUsers",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::MessageStatus(_) => "messageStatus",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresencePayload {
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub receiver_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub message_id: MessageId,
    /// Original sender of the acknowledged message.
    pub peer_id: UserId,
}

/// Events a client may emit over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SetPresence(PresencePayload),
    Typing(TypingUpdate),
    Delivered(AckPayload),
    Read(AckPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SetPresence(_) => "setPresence",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::Delivered(_) => "delivered",
            ClientEvent::Read(_) => "read",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
