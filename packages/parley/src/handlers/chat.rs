//! REST surface of the sync core: the snapshot endpoints and the two
//! endpoints that trigger fan-out (message send, avatar update).
//!
//! The snapshot is the client's sole recovery path after missed events, so
//! both listing endpoints overlay live presence from the registry before
//! returning.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::SyncError;
use crate::models::{ConversationSummary, Message, UserProfile};
use crate::store::ConversationStore;
use crate::ws::ServerMessage;

/// GET /api/chat/conversations — point-in-time snapshot for the caller.
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, SyncError> {
    let mut conversations = state.store.list_for_user(&user.user_id).await?;
    for conv in &mut conversations {
        for participant in &mut conv.participants {
            participant.user.is_online = state.sync.registry.is_online(&participant.user.id).await;
        }
    }
    // Newest activity first, same ordering the client maintains locally
    conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
    Ok(Json(conversations))
}

/// GET /api/chat/users — the user directory with live presence flags.
pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<UserProfile>>, SyncError> {
    let mut users = state.store.list_users().await?;
    for user in &mut users {
        user.is_online = state.sync.registry.is_online(&user.id).await;
    }
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
}

/// POST /api/chat/conversations/{id}/messages — append and fan out.
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), SyncError> {
    if req.content.trim().is_empty() {
        return Err(SyncError::MalformedEvent("empty message content".into()));
    }

    let participants = state
        .store
        .participants_of(&conversation_id)
        .await?
        .ok_or_else(|| SyncError::Forbidden(conversation_id.clone()))?;
    if !participants.iter().any(|p| p == &user.user_id) {
        return Err(SyncError::Forbidden(conversation_id));
    }

    let message = state
        .store
        .append_message(&conversation_id, &user.user_id, &req.content)
        .await?;

    // All room members receive it, the sender's connections included; the
    // client reducer decides what a self-sent message means
    let delivered = state
        .sync
        .broadcaster
        .to_room(
            &conversation_id,
            &ServerMessage::NewMessage {
                message: message.clone(),
            },
        )
        .await;
    debug!(
        "[CHAT] message {} fanned out to {} connections",
        message.id, delivered
    );

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAvatarRequest {
    pub avatar_url: String,
}

/// POST /api/chat/avatar — record the new URL, then notify everyone who
/// shares a conversation with the caller.
pub async fn update_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateAvatarRequest>,
) -> Result<StatusCode, SyncError> {
    state
        .store
        .set_avatar_url(&user.user_id, &req.avatar_url)
        .await?;
    state
        .sync
        .broadcaster
        .to_shared_rooms(
            &user.user_id,
            &ServerMessage::UserAvatarUpdated {
                user_id: user.user_id.clone(),
                avatar_url: req.avatar_url,
            },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
