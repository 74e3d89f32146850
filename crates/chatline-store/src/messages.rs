//! Message store: persistence, conversation history and status flags.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::{Message, MessageId, MessageStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::users::get_user;

/// Durable message storage consumed by the delivery path.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Validate and persist a new message, returning it as stored.
    async fn persist_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: SendMessageRequest,
    ) -> Result<Message>;

    /// Both directions of the conversation between `user` and `counterpart`,
    /// oldest first.
    async fn get_messages(&self, user: &UserId, counterpart: &UserId) -> Result<Vec<Message>>;

    /// Move a message's status forward on behalf of its receiver.
    ///
    /// Returns `false` when the message does not exist, `receiver` is not its
    /// receiver, or the status was already at or beyond `status`.
    async fn mark_status(
        &self,
        message_id: MessageId,
        receiver: &UserId,
        status: MessageStatus,
    ) -> Result<bool>;
}

/// Shared validation for every store implementation.
pub(crate) fn build_message(
    sender: &UserId,
    receiver: &UserId,
    content: SendMessageRequest,
) -> Result<Message> {
    if sender.is_empty() {
        return Err(StoreError::UnknownUser(sender.clone()));
    }
    let content = content.normalise()?;
    Ok(Message {
        id: MessageId::new(),
        sender_id: sender.clone(),
        receiver_id: receiver.clone(),
        text: content.text,
        image: content.image,
        created_at: Utc::now(),
        status: MessageStatus::Sent,
    })
}

fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, sender_id, receiver_id, text, image, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.id.0.to_string(),
            message.sender_id.as_str(),
            message.receiver_id.as_str(),
            message.text,
            message.image,
            message.created_at.to_rfc3339(),
            message.status.as_str(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl MessageStore for Database {
    async fn persist_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: SendMessageRequest,
    ) -> Result<Message> {
        let message = build_message(sender, receiver, content)?;
        self.run(move |conn| {
            for user in [&message.sender_id, &message.receiver_id] {
                if get_user(conn, user)?.is_none() {
                    return Err(StoreError::UnknownUser(user.clone()));
                }
            }
            insert_message(conn, &message)?;
            Ok(message)
        })
        .await
    }

    async fn get_messages(&self, user: &UserId, counterpart: &UserId) -> Result<Vec<Message>> {
        let user = user.clone();
        let counterpart = counterpart.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, text, image, created_at, status
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(
                params![user.as_str(), counterpart.as_str()],
                row_to_message,
            )?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }

    async fn mark_status(
        &self,
        message_id: MessageId,
        receiver: &UserId,
        status: MessageStatus,
    ) -> Result<bool> {
        let receiver = receiver.clone();
        self.run(move |conn| {
            let id = message_id.0.to_string();
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM messages WHERE id = ?1 AND receiver_id = ?2",
                    params![id, receiver.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current.as_deref().and_then(MessageStatus::parse) else {
                return Ok(false);
            };
            let next = current.advance(status);
            if next == current {
                return Ok(false);
            }

            conn.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                params![id, next.as_str()],
            )?;
            Ok(true)
        })
        .await
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    // Unknown values can only come from a foreign writer; treat them as sent.
    let status = MessageStatus::parse(&status_str).unwrap_or(MessageStatus::Sent);

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        text: row.get(3)?,
        image: row.get(4)?,
        created_at,
        status,
    })
}
