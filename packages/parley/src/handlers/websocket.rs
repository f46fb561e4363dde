use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Upgrade handler for the chat WebSocket. Authentication happens in-band
/// (the `authenticate` frame), so the route itself is public.
pub async fn chat_websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws::handle_chat_ws(socket, state))
}
