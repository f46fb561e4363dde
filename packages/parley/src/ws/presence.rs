//! Presence Tracker
//!
//! Turns registry membership edges into `user-online` / `user-offline`
//! events, delivered to everyone who currently shares a conversation room
//! with the user — not to the whole server.
//!
//! Rapid connect/disconnect flapping (a page reload) is not debounced; each
//! transition is delivered independently.

use std::sync::Arc;

use tracing::debug;

use super::protocol::ServerMessage;
use super::registry::PresenceTransition;
use super::rooms::RoomMultiplexer;

pub struct PresenceTracker {
    rooms: Arc<RoomMultiplexer>,
}

impl PresenceTracker {
    pub fn new(rooms: Arc<RoomMultiplexer>) -> Self {
        Self { rooms }
    }

    /// Fan one transition out to the rooms the user is a member of at this
    /// moment. Must run before the caller tears the memberships down, so an
    /// offline edge still reaches the user's rooms.
    pub async fn announce(&self, transition: &PresenceTransition) -> usize {
        let (user_id, event) = match transition {
            PresenceTransition::CameOnline(user_id) => (
                user_id,
                ServerMessage::UserOnline {
                    user_id: user_id.clone(),
                },
            ),
            PresenceTransition::WentOffline(user_id) => (
                user_id,
                ServerMessage::UserOffline {
                    user_id: user_id.clone(),
                },
            ),
        };
        let delivered = self.rooms.broadcast_to_shared(user_id, &event).await;
        debug!(
            "[PRESENCE] {:?} for {} delivered to {} connections",
            transition, user_id, delivered
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServerMetrics;
    use crate::ws::registry::{SessionHandle, SessionRegistry};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        registry: Arc<SessionRegistry>,
        rooms: Arc<RoomMultiplexer>,
        presence: PresenceTracker,
    }

    fn harness() -> Harness {
        let metrics = Arc::new(ServerMetrics::new());
        let registry = Arc::new(SessionRegistry::new(metrics.clone()));
        let rooms = Arc::new(RoomMultiplexer::new(registry.clone(), metrics));
        let presence = PresenceTracker::new(rooms.clone());
        Harness {
            registry,
            rooms,
            presence,
        }
    }

    async fn connect(h: &Harness, user: &str, conn: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(16);
        h.registry
            .register(
                user,
                conn,
                SessionHandle {
                    tx,
                    cancel: CancellationToken::new(),
                },
            )
            .await;
        rx
    }

    #[tokio::test]
    async fn offline_reaches_room_peers_only() {
        let h = harness();
        let mut rx_peer = connect(&h, "u-2", "conn-2").await;
        let mut rx_stranger = connect(&h, "u-3", "conn-3").await;
        connect(&h, "u-1", "conn-1").await;

        let shared = vec!["u-1".to_string(), "u-2".to_string()];
        h.rooms.join("c-1", "u-1", &shared).await.unwrap();
        h.rooms.join("c-1", "u-2", &shared).await.unwrap();

        // u-1's last connection closes: announce before membership teardown
        let transition = h.registry.unregister("conn-1").await.unwrap();
        h.presence.announce(&transition).await;
        h.rooms.remove_user("u-1").await;

        match rx_peer.try_recv() {
            Ok(ServerMessage::UserOffline { user_id }) => assert_eq!(user_id, "u-1"),
            other => panic!("expected user-offline, got {other:?}"),
        }
        assert!(rx_stranger.try_recv().is_err());
    }

    #[tokio::test]
    async fn each_flap_is_announced_independently() {
        let h = harness();
        let mut rx_peer = connect(&h, "u-2", "conn-2").await;

        let shared = vec!["u-1".to_string(), "u-2".to_string()];
        h.rooms.join("c-1", "u-2", &shared).await.unwrap();

        // Two reload cycles: every edge goes out, no debounce
        for i in 0..2 {
            let conn = format!("conn-1-{i}");
            let (tx, _rx) = mpsc::channel(16);
            h.rooms.join("c-1", "u-1", &shared).await.unwrap();
            let handle = SessionHandle {
                tx,
                cancel: CancellationToken::new(),
            };
            if let Some(t) = h.registry.register("u-1", &conn, handle).await {
                h.presence.announce(&t).await;
            }
            let t = h.registry.unregister(&conn).await.unwrap();
            h.presence.announce(&t).await;
            h.rooms.remove_user("u-1").await;
        }

        let mut seen = Vec::new();
        while let Ok(msg) = rx_peer.try_recv() {
            seen.push(msg);
        }
        let onlines = seen
            .iter()
            .filter(|m| matches!(m, ServerMessage::UserOnline { .. }))
            .count();
        let offlines = seen
            .iter()
            .filter(|m| matches!(m, ServerMessage::UserOffline { .. }))
            .count();
        assert_eq!(onlines, 2);
        assert_eq!(offlines, 2);
    }
}
