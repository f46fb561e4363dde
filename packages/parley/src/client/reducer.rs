//! Client Event Reducer
//!
//! Single-threaded state machine that merges REST-fetched snapshots with
//! streamed events into one consistent view: the ordered conversation list,
//! participant presence, and typing state.
//!
//! Presence and avatars live in a single `profiles` map; the user directory
//! and conversation participant lists are derived views over it, so a
//! presence event cannot leave the two out of sync.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{ConversationSummary, Message, UserProfile};
use crate::ws::ServerMessage;

/// A desktop-notification request produced by applying an event. Never raised
/// for messages sent by the local user. `tag` is the conversation id so the
/// embedder can collapse duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
}

/// One user's profile as the client knows it: the single source of truth for
/// presence and avatar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub username: String,
    pub avatar_url: Option<String>,
    pub online: bool,
}

/// Client-local view of one conversation. Participants are ids; their
/// profiles are resolved through the shared map on read.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub participant_ids: Vec<String>,
    /// Last-message-only cache, never full history.
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ConversationView {
    fn activity_at(&self) -> DateTime<Utc> {
        match &self.last_message {
            Some(m) => m.created_at.max(self.created_at),
            None => self.created_at,
        }
    }
}

/// The reducer's whole state. All mutation goes through [`ChatState::apply`],
/// [`ChatState::load_snapshot`] and [`ChatState::select_conversation`], run
/// sequentially on one logical thread.
pub struct ChatState {
    self_id: String,
    conversations: Vec<ConversationView>,
    profiles: HashMap<String, Profile>,
    typing: HashMap<String, String>,
    selected: Option<String>,
}

impl ChatState {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            conversations: Vec::new(),
            profiles: HashMap::new(),
            typing: HashMap::new(),
            selected: None,
        }
    }

    /// Replace the whole view with a fresh snapshot. This is the only
    /// wholesale replacement; everything after it is incremental.
    pub fn load_snapshot(
        &mut self,
        conversations: Vec<ConversationSummary>,
        users: Vec<UserProfile>,
    ) {
        self.profiles.clear();
        for user in users {
            self.profiles.insert(
                user.id,
                Profile {
                    username: user.username,
                    avatar_url: user.avatar_url,
                    online: user.is_online,
                },
            );
        }

        self.conversations = conversations
            .into_iter()
            .map(|summary| {
                let mut participant_ids = Vec::with_capacity(summary.participants.len());
                for participant in summary.participants {
                    let user = participant.user;
                    participant_ids.push(user.id.clone());
                    // Participant snapshots fill gaps the directory missed
                    self.profiles.entry(user.id).or_insert(Profile {
                        username: user.username,
                        avatar_url: user.avatar_url,
                        online: user.is_online,
                    });
                }
                ConversationView {
                    id: summary.id,
                    name: summary.name,
                    is_group: summary.is_group,
                    participant_ids,
                    last_message: summary.messages.into_iter().next(),
                    unread_count: summary.unread_count,
                    created_at: summary.created_at,
                }
            })
            .collect();
        self.sort_conversations();
    }

    /// Merge one streamed event. Runs on the single reducer thread, so each
    /// event's updates are atomic with respect to every derived view.
    pub fn apply(&mut self, event: ServerMessage) -> Option<Notification> {
        match event {
            ServerMessage::NewMessage { message } => self.apply_new_message(message),

            ServerMessage::UserOnline { user_id } => {
                self.set_online(&user_id, true);
                None
            }
            ServerMessage::UserOffline { user_id } => {
                self.set_online(&user_id, false);
                None
            }

            ServerMessage::UserAvatarUpdated {
                user_id,
                avatar_url,
            } => {
                if let Some(profile) = self.profiles.get_mut(&user_id) {
                    profile.avatar_url = Some(avatar_url);
                }
                None
            }

            ServerMessage::UserTyping {
                conversation_id,
                user_id,
            } => {
                // Last writer wins: at most one typing indicator per conversation
                self.typing.insert(conversation_id, user_id);
                None
            }
            ServerMessage::UserStopTyping { conversation_id } => {
                // Removing an absent entry is a no-op, not an error
                self.typing.remove(&conversation_id);
                None
            }

            ServerMessage::Authenticated { .. } => None,
            ServerMessage::Error { message } => {
                debug!("server error frame: {}", message);
                None
            }
        }
    }

    fn apply_new_message(&mut self, message: Message) -> Option<Notification> {
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            // Conversation not yet in the local snapshot; the next fetch
            // recovers it
            debug!(
                "ignoring message for unknown conversation {}",
                message.conversation_id
            );
            return None;
        };

        let from_other = message.sender_id != self.self_id;
        let viewing = self.selected.as_deref() == Some(conv.id.as_str());
        if from_other && !viewing {
            conv.unread_count += 1;
        }
        conv.last_message = Some(message.clone());
        self.sort_conversations();

        from_other.then(|| Notification {
            title: format!("New message from {}", message.sender.username),
            body: message.content,
            tag: message.conversation_id,
        })
    }

    fn set_online(&mut self, user_id: &str, online: bool) {
        // Unknown users are ignored; idempotent for known ones
        if let Some(profile) = self.profiles.get_mut(user_id) {
            profile.online = online;
        }
    }

    /// Stable descending sort by latest activity.
    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
    }

    /// Open a conversation: purely local, resets its unread count to zero.
    pub fn select_conversation(&mut self, conversation_id: &str) {
        self.selected = Some(conversation_id.to_string());
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread_count = 0;
        }
    }

    // --- Derived views ---

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn conversations(&self) -> &[ConversationView] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&ConversationView> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// The conversation ids to re-join after a (re)connect.
    pub fn conversation_ids(&self) -> Vec<String> {
        self.conversations.iter().map(|c| c.id.clone()).collect()
    }

    pub fn profile(&self, user_id: &str) -> Option<&Profile> {
        self.profiles.get(user_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.profiles.get(user_id).is_some_and(|p| p.online)
    }

    /// The user directory, derived from the profile map.
    pub fn users(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self
            .profiles
            .iter()
            .map(|(id, p)| UserProfile {
                id: id.clone(),
                username: p.username.clone(),
                avatar_url: p.avatar_url.clone(),
                is_online: p.online,
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// A conversation's participants with presence/avatar resolved through
    /// the same profile map the directory uses.
    pub fn participants(&self, conversation_id: &str) -> Vec<UserProfile> {
        let Some(conv) = self.conversation(conversation_id) else {
            return Vec::new();
        };
        conv.participant_ids
            .iter()
            .map(|id| match self.profiles.get(id) {
                Some(p) => UserProfile {
                    id: id.clone(),
                    username: p.username.clone(),
                    avatar_url: p.avatar_url.clone(),
                    is_online: p.online,
                },
                None => UserProfile::new(id.clone(), id.clone()),
            })
            .collect()
    }

    /// Who is typing in a conversation, if anyone.
    pub fn typing_in(&self, conversation_id: &str) -> Option<&str> {
        self.typing.get(conversation_id).map(|s| s.as_str())
    }
}
