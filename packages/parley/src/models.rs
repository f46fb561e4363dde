//! Wire data model shared by the REST snapshot, the WebSocket events, and the
//! client-side state.
//!
//! Everything serializes camelCase to match the protocol the web client
//! speaks (`conversationId`, `createdAt`, `unreadCount`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as seen in the directory and inside conversation participant lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
            is_online: false,
        }
    }
}

/// Sender snippet embedded in every message (the client only ever renders the
/// username from it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub username: String,
}

/// A chat message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One participant entry inside a conversation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user: UserProfile,
}

/// Point-in-time view of one conversation, as returned by the REST snapshot.
///
/// `messages` is a deliberate last-message-only cache: it holds at most the
/// single most recent message, never full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    /// The cached most recent message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Sort key for the conversation list: newest activity first.
    /// Activity is the later of the cached last message and the
    /// conversation's own creation time.
    pub fn activity_at(&self) -> DateTime<Utc> {
        match self.last_message() {
            Some(m) => m.created_at.max(self.created_at),
            None => self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg_at(ts: DateTime<Utc>) -> Message {
        Message {
            id: "m-1".into(),
            conversation_id: "c-1".into(),
            sender_id: "u-1".into(),
            sender: Sender {
                username: "alice".into(),
            },
            content: "hi".into(),
            created_at: ts,
        }
    }

    #[test]
    fn message_serializes_camel_case() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(msg_at(ts)).unwrap();
        assert!(json.get("conversationId").is_some());
        assert!(json.get("senderId").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn activity_at_prefers_last_message() {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let conv = ConversationSummary {
            id: "c-1".into(),
            name: None,
            is_group: false,
            participants: vec![],
            messages: vec![msg_at(later)],
            unread_count: 0,
            created_at: created,
            updated_at: created,
        };
        assert_eq!(conv.activity_at(), later);
    }

    #[test]
    fn activity_at_falls_back_to_created() {
        let created = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let conv = ConversationSummary {
            id: "c-1".into(),
            name: None,
            is_group: false,
            participants: vec![],
            messages: vec![],
            unread_count: 0,
            created_at: created,
            updated_at: created,
        };
        assert_eq!(conv.activity_at(), created);
    }

    #[test]
    fn activity_at_uses_max_when_message_is_older() {
        // A conversation created after its cached message (e.g. clock skew on
        // the issuing side) still sorts by the later timestamp.
        let msg_ts = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap();
        let conv = ConversationSummary {
            id: "c-1".into(),
            name: None,
            is_group: false,
            participants: vec![],
            messages: vec![msg_at(msg_ts)],
            unread_count: 0,
            created_at: created,
            updated_at: created,
        };
        assert_eq!(conv.activity_at(), created);
    }
}
