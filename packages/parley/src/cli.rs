//! Terminal client: connect to a server with a credential token and follow
//! the conversation list live.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::client::{ChatState, ConnectionController};
use crate::ws::ServerMessage;

pub async fn connect_command(url: String, token: String) -> Result<()> {
    let mut controller = ConnectionController::new(url);
    let (events_tx, mut events_rx) = mpsc::channel::<ServerMessage>(256);
    controller.connect(&token, events_tx).await?;

    let self_id = controller
        .user_id()
        .map(str::to_string)
        .unwrap_or_default();
    let mut chat = ChatState::new(self_id);
    controller.sync_session(&token, &mut chat).await?;

    println!("connected as {} -- Ctrl-C to quit", chat.self_id());
    render(&chat);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = events_rx.recv() => {
                let Some(event) = event else {
                    println!("[parley: connection lost]");
                    break;
                };
                let list_changed = matches!(
                    event,
                    ServerMessage::NewMessage { .. }
                        | ServerMessage::UserOnline { .. }
                        | ServerMessage::UserOffline { .. }
                );
                if let Some(notification) = chat.apply(event) {
                    println!("  * {}: {}", notification.title, notification.body);
                }
                if list_changed {
                    render(&chat);
                }
            }
        }
    }

    controller.disconnect().await;
    Ok(())
}

fn render(chat: &ChatState) {
    println!("--- conversations ---");
    for conv in chat.conversations() {
        let title = conv.name.clone().unwrap_or_else(|| {
            chat.participants(&conv.id)
                .iter()
                .filter(|p| p.id != chat.self_id())
                .map(|p| p.username.clone())
                .collect::<Vec<_>>()
                .join(", ")
        });
        let last = conv
            .last_message
            .as_ref()
            .map(|m| format!("{}: {}", m.sender.username, m.content))
            .unwrap_or_else(|| "(no messages)".to_string());
        let unread = if conv.unread_count > 0 {
            format!(" [{} unread]", conv.unread_count)
        } else {
            String::new()
        };
        let typing = chat
            .typing_in(&conv.id)
            .map(|u| format!(" ({u} is typing...)"))
            .unwrap_or_default();
        println!("  {title}{unread} -- {last}{typing}");
    }
}
