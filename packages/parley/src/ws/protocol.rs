//! WebSocket Protocol Types
//!
//! Message types for client-server communication. Frames are JSON objects
//! tagged with `type`; event names are kebab-case and payload fields are
//! camelCase, matching the web client's wire protocol.

use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Authenticated identity attached to a connection after the `authenticate`
/// handshake succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsUser {
    pub user_id: String,
    pub username: String,
}

/// Messages sent FROM the client TO the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Credential handshake. Accepted exactly once, as the first frame of the
    /// connection; repeats are ignored.
    Authenticate { token: String },

    /// Subscribe to a conversation's room. Sent for every conversation in the
    /// snapshot, and re-sent after every reconnect (rooms are
    /// connection-scoped, not persisted).
    JoinConversation { conversation_id: String },

    /// Unsubscribe from a conversation's room.
    LeaveConversation { conversation_id: String },

    /// The local user started typing in a conversation.
    UserTyping { conversation_id: String },

    /// The local user stopped typing in a conversation.
    UserStopTyping { conversation_id: String },
}

/// Messages sent FROM the server TO the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake ack: the connection is authenticated as this user.
    Authenticated { user_id: String },

    /// A message was posted to a conversation the user has joined.
    NewMessage { message: Message },

    /// A user sharing at least one room came online.
    UserOnline { user_id: String },

    /// A user sharing at least one room went offline.
    UserOffline { user_id: String },

    /// Someone is typing in a conversation.
    UserTyping {
        conversation_id: String,
        user_id: String,
    },

    /// Typing stopped in a conversation.
    UserStopTyping { conversation_id: String },

    /// A user changed their avatar.
    UserAvatarUpdated {
        user_id: String,
        avatar_url: String,
    },

    /// Server-side diagnostic for this connection.
    Error { message: String },
}
