//! Message dispatcher for authenticated WebSocket connections.
//!
//! The per-connection input loop in `ws/handler.rs` feeds every parsed frame
//! through [`dispatch_client_message`] with the connection's context.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::SyncService;
use super::protocol::{ClientMessage, ServerMessage, WsUser};
use crate::error::SyncError;
use crate::store::ConversationStore;

/// Per-connection context shared between the transport layer and the
/// dispatcher.
pub(crate) struct ConnectionContext {
    pub connection_id: String,
    pub user: WsUser,
    pub tx: mpsc::Sender<ServerMessage>,
    pub sync: Arc<SyncService>,
    pub store: Arc<dyn ConversationStore>,
}

impl ConnectionContext {
    async fn send_error(&self, message: impl Into<String>) {
        let msg = ServerMessage::Error {
            message: message.into(),
        };
        if self.tx.send(msg).await.is_err() {
            warn!(
                conn_id = %self.connection_id,
                "failed to send error frame - channel closed"
            );
        }
    }
}

/// Dispatch a single `ClientMessage` for an authenticated connection.
pub(crate) async fn dispatch_client_message(ctx: &ConnectionContext, msg: ClientMessage) {
    match msg {
        ClientMessage::Authenticate { .. } => {
            // Authentication happens exactly once, before the dispatcher runs
            debug!(
                conn_id = %ctx.connection_id,
                "duplicate authenticate frame ignored"
            );
        }

        ClientMessage::JoinConversation { conversation_id } => {
            // Validate participation against storage, then hand the assertion
            // to the multiplexer
            let participants = match ctx.store.participants_of(&conversation_id).await {
                Ok(Some(participants)) => participants,
                Ok(None) => {
                    ctx.send_error(format!("not a participant of conversation {conversation_id}"))
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(conversation = %conversation_id, "participant lookup failed: {}", e);
                    ctx.send_error("conversation lookup failed").await;
                    return;
                }
            };

            match ctx
                .sync
                .rooms
                .join(&conversation_id, &ctx.user.user_id, &participants)
                .await
            {
                Ok(()) => {}
                Err(SyncError::Forbidden(_)) => {
                    warn!(
                        user = %ctx.user.user_id,
                        conversation = %conversation_id,
                        "forbidden join attempt"
                    );
                    ctx.send_error(format!("not a participant of conversation {conversation_id}"))
                        .await;
                }
                Err(e) => {
                    ctx.send_error(e.to_string()).await;
                }
            }
        }

        ClientMessage::LeaveConversation { conversation_id } => {
            ctx.sync
                .rooms
                .leave(&conversation_id, &ctx.user.user_id)
                .await;
        }

        ClientMessage::UserTyping { conversation_id } => {
            // Relay only within rooms the sender has actually joined; the
            // sending connection is excluded, other devices of the same user
            // are not
            if !ctx
                .sync
                .rooms
                .members_of(&conversation_id)
                .await
                .contains(&ctx.user.user_id)
            {
                return;
            }
            ctx.sync
                .rooms
                .broadcast(
                    &conversation_id,
                    &ServerMessage::UserTyping {
                        conversation_id: conversation_id.clone(),
                        user_id: ctx.user.user_id.clone(),
                    },
                    Some(&ctx.connection_id),
                )
                .await;
        }

        ClientMessage::UserStopTyping { conversation_id } => {
            if !ctx
                .sync
                .rooms
                .members_of(&conversation_id)
                .await
                .contains(&ctx.user.user_id)
            {
                return;
            }
            ctx.sync
                .rooms
                .broadcast(
                    &conversation_id,
                    &ServerMessage::UserStopTyping {
                        conversation_id: conversation_id.clone(),
                    },
                    Some(&ctx.connection_id),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServerMetrics;
    use crate::models::UserProfile;
    use crate::store::MemoryStore;
    use crate::ws::registry::SessionHandle;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        sync: Arc<SyncService>,
        store: Arc<MemoryStore>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.add_user(UserProfile::new("u-1", "alice")).await;
        store.add_user(UserProfile::new("u-2", "bob")).await;
        store.add_user(UserProfile::new("u-3", "carol")).await;
        store
            .add_conversation("c-1", None, vec!["u-1".into(), "u-2".into()])
            .await;
        Harness {
            sync: SyncService::new(Arc::new(ServerMetrics::new())),
            store,
        }
    }

    async fn context(
        h: &Harness,
        user_id: &str,
        conn: &str,
    ) -> (ConnectionContext, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        h.sync
            .registry
            .register(
                user_id,
                conn,
                SessionHandle {
                    tx: tx.clone(),
                    cancel: CancellationToken::new(),
                },
            )
            .await;
        (
            ConnectionContext {
                connection_id: conn.to_string(),
                user: WsUser {
                    user_id: user_id.to_string(),
                    username: user_id.to_string(),
                },
                tx,
                sync: h.sync.clone(),
                store: h.store.clone(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn join_adds_membership() {
        let h = harness().await;
        let (ctx, _rx) = context(&h, "u-1", "conn-1").await;
        dispatch_client_message(
            &ctx,
            ClientMessage::JoinConversation {
                conversation_id: "c-1".into(),
            },
        )
        .await;
        assert!(h.sync.rooms.members_of("c-1").await.contains("u-1"));
    }

    #[tokio::test]
    async fn forbidden_join_sends_error_and_leaves_membership_unchanged() {
        let h = harness().await;
        let (ctx, mut rx) = context(&h, "u-3", "conn-3").await;
        dispatch_client_message(
            &ctx,
            ClientMessage::JoinConversation {
                conversation_id: "c-1".into(),
            },
        )
        .await;

        assert!(!h.sync.rooms.members_of("c-1").await.contains("u-3"));
        match rx.recv().await {
            Some(ServerMessage::Error { message }) => {
                assert!(message.contains("not a participant"), "{message}");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_unknown_conversation_sends_error() {
        let h = harness().await;
        let (ctx, mut rx) = context(&h, "u-1", "conn-1").await;
        dispatch_client_message(
            &ctx,
            ClientMessage::JoinConversation {
                conversation_id: "ghost".into(),
            },
        )
        .await;
        assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn typing_relays_to_peers_but_not_origin() {
        let h = harness().await;
        let (ctx1, mut rx1) = context(&h, "u-1", "conn-1").await;
        let (ctx2, mut rx2) = context(&h, "u-2", "conn-2").await;

        for ctx in [&ctx1, &ctx2] {
            dispatch_client_message(
                ctx,
                ClientMessage::JoinConversation {
                    conversation_id: "c-1".into(),
                },
            )
            .await;
        }

        dispatch_client_message(
            &ctx1,
            ClientMessage::UserTyping {
                conversation_id: "c-1".into(),
            },
        )
        .await;

        match rx2.try_recv() {
            Ok(ServerMessage::UserTyping {
                conversation_id,
                user_id,
            }) => {
                assert_eq!(conversation_id, "c-1");
                assert_eq!(user_id, "u-1");
            }
            other => panic!("expected user-typing, got {other:?}"),
        }
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_outside_joined_rooms_is_ignored() {
        let h = harness().await;
        let (ctx1, _rx1) = context(&h, "u-1", "conn-1").await;
        let (ctx2, mut rx2) = context(&h, "u-2", "conn-2").await;

        // Only u-2 joined; u-1 types without having joined
        dispatch_client_message(
            &ctx2,
            ClientMessage::JoinConversation {
                conversation_id: "c-1".into(),
            },
        )
        .await;
        dispatch_client_message(
            &ctx1,
            ClientMessage::UserTyping {
                conversation_id: "c-1".into(),
            },
        )
        .await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_authenticate_is_ignored() {
        let h = harness().await;
        let (ctx, mut rx) = context(&h, "u-1", "conn-1").await;
        dispatch_client_message(
            &ctx,
            ClientMessage::Authenticate {
                token: "whatever".into(),
            },
        )
        .await;
        assert!(rx.try_recv().is_err());
    }
}
