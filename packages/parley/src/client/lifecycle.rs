//! Connection Lifecycle Controller
//!
//! Owns one transport connection per authenticated session:
//! `Disconnected -> Connecting -> Authenticated -> Disconnected`. A
//! connection is opened only when a local identity is present, closed (not
//! left dangling) on logout, and reopened on a new login.
//!
//! On entering `Authenticated` the cached credential has been supplied to the
//! server exactly once. After every (re)connect the controller re-runs the
//! snapshot fetch and re-joins every conversation room — there is no event
//! replay buffer, the snapshot is the recovery path.

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reducer::ChatState;
use crate::models::{ConversationSummary, UserProfile};
use crate::ws::{ClientMessage, ServerMessage};

const ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
}

/// Decode one server frame. Malformed frames are reported, never panicked on.
pub fn parse_server_event(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub struct ConnectionController {
    base_url: String,
    state_tx: watch::Sender<ConnectionState>,
    cancel: Option<CancellationToken>,
    task: Option<tokio::task::JoinHandle<()>>,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    user_id: Option<String>,
    http: reqwest::Client,
}

impl ConnectionController {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state_tx,
            cancel: None,
            task: None,
            outbound: None,
            user_id: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch handle for state changes (UI bindings).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The user id the server acknowledged, while authenticated.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn ws_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/api/ws")
    }

    /// Open the transport and authenticate with the cached credential.
    /// Parsed server events flow into `events` until disconnect; the channel
    /// closing is the disconnect signal for the consumer.
    pub async fn connect(
        &mut self,
        credential: &str,
        events: mpsc::Sender<ServerMessage>,
    ) -> Result<()> {
        // A fresh login tears down any previous session first
        if self.cancel.is_some() {
            self.disconnect().await;
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        let ws_url = self.ws_url();
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&ws_url).await {
            Ok(ok) => ok,
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e).context("websocket connect");
            }
        };
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // The credential is supplied exactly once per connection
        let frame = serde_json::to_string(&ClientMessage::Authenticate {
            token: credential.to_string(),
        })?;
        if let Err(e) = ws_write.send(tungstenite::Message::Text(frame.into())).await {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            return Err(e).context("send credential");
        }

        // Wait for the handshake ack; anything else means the server will
        // never deliver room events on this connection
        let ack = tokio::time::timeout(ACK_TIMEOUT, async {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(tungstenite::Message::Text(text)) => match parse_server_event(&text) {
                        Ok(event) => return Some(event),
                        Err(e) => warn!("dropping malformed frame during handshake: {}", e),
                    },
                    Ok(tungstenite::Message::Close(_)) | Err(_) => return None,
                    _ => {}
                }
            }
            None
        })
        .await;

        let user_id = match ack {
            Ok(Some(ServerMessage::Authenticated { user_id })) => user_id,
            Ok(Some(ServerMessage::Error { message })) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                bail!("authentication refused: {message}");
            }
            Ok(Some(_)) | Ok(None) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                bail!("connection closed before authentication ack");
            }
            Err(_) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                bail!("timed out waiting for authentication ack");
            }
        };
        info!("authenticated as {}", user_id);
        self.user_id = Some(user_id);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(64);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let state_tx = self.state_tx.clone();
        // Authenticated before the session task runs, so an immediate server
        // close still transitions Authenticated -> Disconnected in order
        self.state_tx.send_replace(ConnectionState::Authenticated);

        // The session task owns both socket halves; cancellation on
        // disconnect is channel closure
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = ws_write.close().await;
                        break;
                    }
                    outgoing = outbound_rx.recv() => {
                        let Some(msg) = outgoing else { break };
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("failed to serialize client frame: {}", e);
                                continue;
                            }
                        };
                        if ws_write.send(tungstenite::Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    incoming = ws_read.next() => {
                        match incoming {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                match parse_server_event(&text) {
                                    Ok(event) => {
                                        if events.send(event).await.is_err() {
                                            // Consumer went away; tear down
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("dropping malformed frame: {}", e);
                                    }
                                }
                            }
                            Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => {
                                debug!("server closed connection");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            state_tx.send_replace(ConnectionState::Disconnected);
        });

        self.cancel = Some(cancel);
        self.task = Some(task);
        self.outbound = Some(outbound_tx);
        Ok(())
    }

    /// Send one frame over the live connection.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        match &self.outbound {
            Some(tx) => tx.send(msg).await.context("connection task gone"),
            None => bail!("not connected"),
        }
    }

    /// Tear the connection down (logout, shutdown). Safe to call when
    /// already disconnected. Waits for the session task so a later connect
    /// cannot race against this session's teardown.
    pub async fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.outbound = None;
        self.user_id = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Fetch the REST snapshot: the conversation list and the user directory.
    pub async fn fetch_snapshot(
        &self,
        credential: &str,
    ) -> Result<(Vec<ConversationSummary>, Vec<UserProfile>)> {
        let conversations = self
            .http
            .get(format!("{}/api/chat/conversations", self.base_url))
            .bearer_auth(credential)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ConversationSummary>>()
            .await?;
        let users = self
            .http
            .get(format!("{}/api/chat/users", self.base_url))
            .bearer_auth(credential)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<UserProfile>>()
            .await?;
        Ok((conversations, users))
    }

    /// The full sync sequence run after every connect and reconnect: fetch
    /// the snapshot, load it into the reducer, and re-join every conversation
    /// room (memberships did not survive the previous disconnect).
    pub async fn sync_session(&self, credential: &str, state: &mut ChatState) -> Result<()> {
        let (conversations, users) = self.fetch_snapshot(credential).await?;
        state.load_snapshot(conversations, users);
        for conversation_id in state.conversation_ids() {
            self.send(ClientMessage::JoinConversation { conversation_id })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        let controller = ConnectionController::new("http://127.0.0.1:4000");
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.user_id().is_none());
    }

    #[test]
    fn ws_url_derivation() {
        let c = ConnectionController::new("http://127.0.0.1:4000/");
        assert_eq!(c.ws_url(), "ws://127.0.0.1:4000/api/ws");
        let c = ConnectionController::new("https://chat.example.com");
        assert_eq!(c.ws_url(), "wss://chat.example.com/api/ws");
    }

    #[test]
    fn malformed_frames_are_decode_errors_not_panics() {
        assert!(parse_server_event("{not json").is_err());
        assert!(parse_server_event(r#"{"type":"no-such-event"}"#).is_err());
        // Missing required field
        assert!(parse_server_event(r#"{"type":"user-online"}"#).is_err());
        // Valid frame still parses
        assert!(parse_server_event(r#"{"type":"user-online","userId":"u-1"}"#).is_ok());
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let controller = ConnectionController::new("http://127.0.0.1:4000");
        let result = controller
            .send(ClientMessage::UserStopTyping {
                conversation_id: "c-1".into(),
            })
            .await;
        assert!(result.is_err());
    }

    // The full connect/authenticate/sync loop against a live server runs in
    // the end-to-end test (`session_tests` in main.rs), which owns a bound
    // listener.
}
