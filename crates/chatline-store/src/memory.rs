//! In-memory store for development and tests. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::{Message, MessageId, MessageStatus, UserId, UserProfile};

use crate::error::{Result, StoreError};
use crate::messages::{build_message, MessageStore};
use crate::users::UserDirectory;

#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<UserId, UserProfile>>>,
    messages: Arc<RwLock<Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserProfile) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateUser(user.email));
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn list_users_except(&self, id: &UserId) -> Result<Vec<UserProfile>> {
        let mut users: Vec<UserProfile> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| &u.id != id)
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            a.fullname
                .to_lowercase()
                .cmp(&b.fullname.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(users)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: SendMessageRequest,
    ) -> Result<Message> {
        let message = build_message(sender, receiver, content)?;
        {
            let users = self.users.read().await;
            for user in [sender, receiver] {
                if !users.contains_key(user) {
                    return Err(StoreError::UnknownUser(user.clone()));
                }
            }
        }
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn get_messages(&self, user: &UserId, counterpart: &UserId) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| {
                (&m.sender_id == user && &m.receiver_id == counterpart)
                    || (&m.sender_id == counterpart && &m.receiver_id == user)
            })
            .cloned()
            .collect())
    }

    async fn mark_status(
        &self,
        message_id: MessageId,
        receiver: &UserId,
        status: MessageStatus,
    ) -> Result<bool> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == message_id && &m.receiver_id == receiver)
        else {
            return Ok(false);
        };

        let next = message.status.advance(status);
        if next == message.status {
            return Ok(false);
        }
        message.status = next;
        Ok(true)
    }
}
