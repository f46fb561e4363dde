//! Event Broadcaster
//!
//! Typed fan-out API used by REST handlers and the dispatcher to emit domain
//! events to rooms or to individual users. Pure routing: no buffering and no
//! at-least-once guarantee beyond the transport's own delivery — an event
//! sent while a user has zero live connections is simply not received, and
//! the REST snapshot is the recovery path.

use std::sync::Arc;

use super::protocol::ServerMessage;
use super::registry::SessionRegistry;
use super::rooms::RoomMultiplexer;

pub struct EventBroadcaster {
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomMultiplexer>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>, rooms: Arc<RoomMultiplexer>) -> Self {
        Self { registry, rooms }
    }

    /// Deliver to every live connection of every member of a room.
    pub async fn to_room(&self, conversation_id: &str, event: &ServerMessage) -> usize {
        self.rooms.broadcast(conversation_id, event, None).await
    }

    /// Deliver to every live connection of one user.
    pub async fn to_user(&self, user_id: &str, event: &ServerMessage) -> usize {
        self.registry.send_to_user(user_id, event).await
    }

    /// Deliver once to everyone sharing at least one room with the user
    /// (presence and avatar updates).
    pub async fn to_shared_rooms(&self, user_id: &str, event: &ServerMessage) -> usize {
        self.rooms.broadcast_to_shared(user_id, event).await
    }
}
