//! Storage collaborator seam.
//!
//! Message persistence is not this crate's concern: the sync core talks to an
//! external `ConversationStore` and never touches a database directly.
//! `MemoryStore` is the in-process implementation backing tests and the dev
//! server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::SyncError;
use crate::models::{ConversationSummary, Message, Participant, Sender, UserProfile};

/// The conversation/user storage the sync core depends on.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Snapshot: all conversations the user participates in.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>, SyncError>;

    /// Participant ids of one conversation, or `None` if it does not exist.
    /// Backs the multiplexer's participation check.
    async fn participants_of(&self, conversation_id: &str)
    -> Result<Option<Vec<String>>, SyncError>;

    /// The full user directory.
    async fn list_users(&self) -> Result<Vec<UserProfile>, SyncError>;

    /// Look up one user's profile.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, SyncError>;

    /// Persist a message and return it in wire form. The caller must have
    /// validated participation first.
    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message, SyncError>;

    /// Record a new avatar URL for a user.
    async fn set_avatar_url(&self, user_id: &str, avatar_url: &str) -> Result<(), SyncError>;
}

struct StoredConversation {
    id: String,
    name: Option<String>,
    is_group: bool,
    participants: Vec<String>,
    last_message: Option<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, UserProfile>,
    conversations: Vec<StoredConversation>,
}

/// In-memory store for tests and the dev server.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, profile: UserProfile) {
        let mut inner = self.inner.write().await;
        inner.users.insert(profile.id.clone(), profile);
    }

    /// Seed a conversation; returns its id.
    pub async fn add_conversation(
        &self,
        id: impl Into<String>,
        name: Option<String>,
        participants: Vec<String>,
    ) -> String {
        let id = id.into();
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner.conversations.push(StoredConversation {
            id: id.clone(),
            name,
            is_group: participants.len() > 2,
            participants,
            last_message: None,
            created_at: now,
            updated_at: now,
        });
        id
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>, SyncError> {
        let inner = self.inner.read().await;
        let summaries = inner
            .conversations
            .iter()
            .filter(|c| c.participants.iter().any(|p| p == user_id))
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                is_group: c.is_group,
                participants: c
                    .participants
                    .iter()
                    .map(|p| Participant {
                        user: inner
                            .users
                            .get(p)
                            .cloned()
                            .unwrap_or_else(|| UserProfile::new(p.clone(), p.clone())),
                    })
                    .collect(),
                messages: c.last_message.clone().into_iter().collect(),
                unread_count: 0,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect();
        Ok(summaries)
    }

    async fn participants_of(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Vec<String>>, SyncError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.participants.clone()))
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, SyncError> {
        let inner = self.inner.read().await;
        let mut users: Vec<_> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, SyncError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(user_id).cloned())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message, SyncError> {
        let mut inner = self.inner.write().await;
        let username = inner
            .users
            .get(sender_id)
            .map(|u| u.username.clone())
            .unwrap_or_else(|| sender_id.to_string());
        let conv = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| SyncError::Forbidden(conversation_id.to_string()))?;
        if !conv.participants.iter().any(|p| p == sender_id) {
            return Err(SyncError::Forbidden(conversation_id.to_string()));
        }

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender: Sender { username },
            content: content.to_string(),
            created_at: Utc::now(),
        };
        conv.last_message = Some(message.clone());
        conv.updated_at = message.created_at;
        Ok(message)
    }

    async fn set_avatar_url(&self, user_id: &str, avatar_url: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(user_id) {
            Some(user) => {
                user.avatar_url = Some(avatar_url.to_string());
                Ok(())
            }
            None => Err(SyncError::Store(format!("unknown user {user_id}"))),
        }
    }
}
