//! WebSocket Connection Handler
//!
//! One task per transport connection. A connection must authenticate within
//! the grace period before it enters the registry; after that the handler
//! runs a sender task (draining the bounded outbound queue) and an input loop
//! side by side until either ends or the connection is cancelled.
//!
//! Disconnect cleanup runs synchronously at the end of this function, before
//! any further event for the user can be processed: unregister first, then
//! (on the last connection) presence fan-out and room teardown.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::{ConnectionContext, dispatch_client_message};
use super::protocol::{ClientMessage, ServerMessage, WsUser};
use super::registry::{PresenceTransition, SessionHandle};
use crate::AppState;
use crate::auth::Identity;
use crate::store::ConversationStore;

/// Handle one chat WebSocket connection for its entire lifetime.
pub async fn handle_chat_ws(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    state.metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Authentication phase: exactly one credential, within the grace period.
    // A connection that fails here never enters the registry.
    let user_id = match await_credential(&mut ws_receiver, state.config.auth_grace).await {
        Ok(token) => match state.identity.verify(&token) {
            Ok(user_id) => user_id,
            Err(e) => {
                state.metrics.auth_failure();
                info!(conn_id = %connection_id, "credential rejected: {}", e);
                send_refusal(&mut ws_sender, "authentication failed").await;
                state.metrics.connection_closed();
                return;
            }
        },
        Err(reason) => {
            state.metrics.auth_failure();
            info!(conn_id = %connection_id, "dropping unauthenticated connection: {}", reason);
            send_refusal(&mut ws_sender, reason).await;
            state.metrics.connection_closed();
            return;
        }
    };

    let username = match state.store.get_user(&user_id).await {
        Ok(Some(profile)) => profile.username,
        _ => user_id.clone(),
    };
    let user = WsUser {
        user_id: user_id.clone(),
        username,
    };
    info!(
        "[WS] connection {} authenticated as {} ({})",
        connection_id, user.username, user.user_id
    );

    // Bounded outbound queue; a full queue cancels the connection
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.outbound_queue);
    let cancel = CancellationToken::new();

    let transition = state
        .sync
        .registry
        .register(
            &user_id,
            &connection_id,
            SessionHandle {
                tx: tx.clone(),
                cancel: cancel.clone(),
            },
        )
        .await;

    // Handshake ack before any room event
    if tx
        .send(ServerMessage::Authenticated {
            user_id: user_id.clone(),
        })
        .await
        .is_err()
    {
        warn!(conn_id = %connection_id, "failed to queue handshake ack - channel closed");
    }

    if let Some(transition) = &transition {
        state.sync.presence.announce(transition).await;
    }

    // Task to drain the outbound queue into the socket
    let cancel_sender = cancel.clone();
    let sender_task = async move {
        loop {
            tokio::select! {
                _ = cancel_sender.cancelled() => break,
                maybe = rx.recv() => {
                    let Some(msg) = maybe else { break };
                    let json = match serde_json::to_string(&msg) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    // Task to handle incoming frames
    let ctx = ConnectionContext {
        connection_id: connection_id.clone(),
        user,
        tx,
        sync: state.sync.clone(),
        store: state.store.clone(),
    };
    let metrics = state.metrics.clone();
    let input_task = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    metrics.message_received();
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => dispatch_client_message(&ctx, msg).await,
                        Err(e) => {
                            // Malformed frames are dropped, never fatal
                            metrics.malformed_frame();
                            debug!(conn_id = %ctx.connection_id, "dropping malformed frame: {}", e);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Client closed connection");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    // Synchronous deregistration: must complete before this handler returns
    // so no later event for this user can observe the dead connection
    if let Some(transition) = state.sync.registry.unregister(&connection_id).await {
        state.sync.presence.announce(&transition).await;
        if let PresenceTransition::WentOffline(user_id) = &transition {
            state.sync.rooms.remove_user(user_id).await;
        }
    }
    state.metrics.connection_closed();
    info!("[WS] connection {} closed", connection_id);
}

/// Wait for the `authenticate` frame, bounded by the grace period. Anything
/// other than a credential as the first text frame drops the connection.
async fn await_credential(
    receiver: &mut SplitStream<WebSocket>,
    grace: Duration,
) -> Result<String, &'static str> {
    let first_frame = tokio::time::timeout(grace, async {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Authenticate { token }) => Some(token),
                        _ => None,
                    };
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                // Ping/pong before the handshake is fine
                _ => continue,
            }
        }
        None
    })
    .await;

    match first_frame {
        Ok(Some(token)) => Ok(token),
        Ok(None) => Err("expected authenticate frame"),
        Err(_) => Err("authentication grace period expired"),
    }
}

/// Best-effort refusal frame before closing an unauthenticated connection.
async fn send_refusal(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    reason: &str,
) {
    let frame = ServerMessage::Error {
        message: reason.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = ws_sender.send(Message::Text(json.into())).await;
    }
    let _ = ws_sender.close().await;
}
