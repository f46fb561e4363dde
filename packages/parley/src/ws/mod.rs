//! Real-time synchronization core (server side).
//!
//! - Session Registry: user identity -> live connections
//! - Room Multiplexer: conversation -> subscribed users, event routing
//! - Presence Tracker: registry edges -> online/offline fan-out
//! - Event Broadcaster: typed fan-out API for REST handlers and the dispatcher

mod broadcast;
pub(crate) mod dispatch;
mod handler;
mod presence;
mod protocol;
mod registry;
mod rooms;

use std::sync::Arc;

use crate::metrics::ServerMetrics;

pub use broadcast::EventBroadcaster;
pub use handler::handle_chat_ws;
pub use presence::PresenceTracker;
pub use protocol::{ClientMessage, ServerMessage, WsUser};
pub use registry::{PresenceTransition, SessionHandle, SessionRegistry};
pub use rooms::RoomMultiplexer;

/// The injected synchronization service: registry, multiplexer, presence and
/// broadcaster wired together. Constructed once in `main`, started with the
/// transport listener, shut down with it. No ambient global state.
pub struct SyncService {
    pub registry: Arc<SessionRegistry>,
    pub rooms: Arc<RoomMultiplexer>,
    pub presence: PresenceTracker,
    pub broadcaster: EventBroadcaster,
}

impl SyncService {
    pub fn new(metrics: Arc<ServerMetrics>) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(metrics.clone()));
        let rooms = Arc::new(RoomMultiplexer::new(registry.clone(), metrics));
        let presence = PresenceTracker::new(rooms.clone());
        let broadcaster = EventBroadcaster::new(registry.clone(), rooms.clone());
        Arc::new(Self {
            registry,
            rooms,
            presence,
            broadcaster,
        })
    }

    /// Cancel every live connection (graceful shutdown).
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}
