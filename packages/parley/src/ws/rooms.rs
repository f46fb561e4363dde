//! Room Multiplexer
//!
//! Maps a conversation id to the set of user identities currently subscribed,
//! and routes outbound events to all of a member's live connections.
//!
//! Memberships are user-scoped and live only as long as the user has at least
//! one connection: the connection handler calls [`RoomMultiplexer::remove_user`]
//! on the last disconnect, and clients re-join after every reconnect by
//! replaying the snapshot's conversation id list.
//!
//! The multiplexer trusts a participant-list assertion supplied by the caller
//! rather than re-querying storage; callers validate participation before
//! `join`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::protocol::ServerMessage;
use super::registry::SessionRegistry;
use crate::error::SyncError;
use crate::metrics::ServerMetrics;

pub struct RoomMultiplexer {
    registry: Arc<SessionRegistry>,
    rooms: RwLock<HashMap<String, HashSet<String>>>,
    metrics: Arc<ServerMetrics>,
}

impl RoomMultiplexer {
    pub fn new(registry: Arc<SessionRegistry>, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            registry,
            rooms: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Add a membership. Idempotent. `participants` is the caller's assertion
    /// of who belongs to the conversation; a user not in it gets `Forbidden`
    /// and the membership set stays unchanged.
    pub async fn join(
        &self,
        conversation_id: &str,
        user_id: &str,
        participants: &[String],
    ) -> Result<(), SyncError> {
        if !participants.iter().any(|p| p == user_id) {
            return Err(SyncError::Forbidden(conversation_id.to_string()));
        }
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(conversation_id.to_string()).or_default();
        if members.insert(user_id.to_string()) {
            self.metrics.room_joined();
            debug!(
                "[ROOMS] {} joined {} ({} members)",
                user_id,
                conversation_id,
                members.len()
            );
        }
        Ok(())
    }

    /// Remove one membership. Removing an absent membership is a no-op.
    pub async fn leave(&self, conversation_id: &str, user_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(conversation_id) {
            if members.remove(user_id) {
                self.metrics.room_left();
                debug!("[ROOMS] {} left {}", user_id, conversation_id);
            }
            if members.is_empty() {
                rooms.remove(conversation_id);
            }
        }
    }

    /// The set of users with at least one active membership for a room.
    pub async fn members_of(&self, conversation_id: &str) -> HashSet<String> {
        self.rooms
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every room the user is currently a member of.
    pub async fn rooms_for(&self, user_id: &str) -> Vec<String> {
        self.rooms
            .read()
            .await
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop all memberships for a user (their last connection closed).
    /// Idempotent. Returns the rooms the user was removed from.
    pub async fn remove_user(&self, user_id: &str) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut removed = Vec::new();
        let mut empty = Vec::new();
        for (conversation_id, members) in rooms.iter_mut() {
            if members.remove(user_id) {
                self.metrics.room_left();
                removed.push(conversation_id.clone());
                if members.is_empty() {
                    empty.push(conversation_id.clone());
                }
            }
        }
        for id in empty {
            rooms.remove(&id);
        }
        if !removed.is_empty() {
            debug!(
                "[ROOMS] removed {} from {} rooms on last disconnect",
                user_id,
                removed.len()
            );
        }
        removed
    }

    /// Deliver an event to every live connection of every room member.
    /// Echo suppression is the caller's decision via `exclude_connection`.
    pub async fn broadcast(
        &self,
        conversation_id: &str,
        event: &ServerMessage,
        exclude_connection: Option<&str>,
    ) -> usize {
        let members = self.members_of(conversation_id).await;
        let mut delivered = 0;
        for member in &members {
            delivered += self
                .registry
                .send_to_user_except(member, event, exclude_connection)
                .await;
        }
        delivered
    }

    /// Deliver one event to every user sharing at least one room with
    /// `user_id` — the union of all their rooms' members, each receiver hit
    /// once (the presence/avatar fan-out pattern).
    pub async fn broadcast_to_shared(&self, user_id: &str, event: &ServerMessage) -> usize {
        let receivers: HashSet<String> = {
            let rooms = self.rooms.read().await;
            rooms
                .values()
                .filter(|members| members.contains(user_id))
                .flat_map(|members| members.iter().cloned())
                .collect()
        };
        let mut delivered = 0;
        for receiver in &receivers {
            delivered += self.registry.send_to_user(receiver, event).await;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::SessionHandle;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn services() -> (Arc<SessionRegistry>, RoomMultiplexer) {
        let metrics = Arc::new(ServerMetrics::new());
        let registry = Arc::new(SessionRegistry::new(metrics.clone()));
        let rooms = RoomMultiplexer::new(registry.clone(), metrics);
        (registry, rooms)
    }

    async fn connect(
        registry: &SessionRegistry,
        user: &str,
        conn: &str,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(16);
        registry
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

    fn participants(users: &[&str]) -> Vec<String> {
        users.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let (_registry, rooms) = services();
        let parts = participants(&["u-1", "u-2"]);
        rooms.join("c-1", "u-1", &parts).await.unwrap();
        rooms.join("c-1", "u-1", &parts).await.unwrap();
        assert_eq!(rooms.members_of("c-1").await.len(), 1);
    }

    #[tokio::test]
    async fn join_non_participant_is_forbidden_and_membership_unchanged() {
        let (_registry, rooms) = services();
        let parts = participants(&["u-1", "u-2"]);
        rooms.join("c-1", "u-1", &parts).await.unwrap();

        let err = rooms.join("c-1", "u-3", &parts).await.unwrap_err();
        assert!(matches!(err, SyncError::Forbidden(_)));
        let members = rooms.members_of("c-1").await;
        assert_eq!(members.len(), 1);
        assert!(members.contains("u-1"));
    }

    #[tokio::test]
    async fn members_of_tracks_join_leave_sequences() {
        let (_registry, rooms) = services();
        let parts = participants(&["u-1", "u-2", "u-3"]);
        rooms.join("c-1", "u-1", &parts).await.unwrap();
        rooms.join("c-1", "u-2", &parts).await.unwrap();
        rooms.leave("c-1", "u-1").await;
        rooms.leave("c-1", "u-1").await; // absent: no-op
        rooms.join("c-1", "u-3", &parts).await.unwrap();

        let members = rooms.members_of("c-1").await;
        assert_eq!(
            members,
            ["u-2", "u-3"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[tokio::test]
    async fn remove_user_clears_every_room_and_is_idempotent() {
        let (_registry, rooms) = services();
        let parts_a = participants(&["u-1", "u-2"]);
        let parts_b = participants(&["u-1", "u-3"]);
        rooms.join("c-a", "u-1", &parts_a).await.unwrap();
        rooms.join("c-b", "u-1", &parts_b).await.unwrap();
        rooms.join("c-a", "u-2", &parts_a).await.unwrap();

        let mut removed = rooms.remove_user("u-1").await;
        removed.sort();
        assert_eq!(removed, vec!["c-a".to_string(), "c-b".to_string()]);
        assert!(!rooms.members_of("c-a").await.contains("u-1"));
        assert!(rooms.rooms_for("u-1").await.is_empty());

        // Idempotent if repeated
        assert!(rooms.remove_user("u-1").await.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_both_devices_of_a_member_exactly_once() {
        let (registry, rooms) = services();
        let mut rx_a = connect(&registry, "u-1", "conn-a").await;
        let mut rx_b = connect(&registry, "u-1", "conn-b").await;
        let _rx_c = connect(&registry, "u-2", "conn-c").await;

        let parts = participants(&["u-1", "u-2"]);
        rooms.join("c-1", "u-1", &parts).await.unwrap();
        rooms.join("c-1", "u-2", &parts).await.unwrap();

        let delivered = rooms
            .broadcast(
                "c-1",
                &ServerMessage::UserStopTyping {
                    conversation_id: "c-1".into(),
                },
                None,
            )
            .await;
        assert_eq!(delivered, 3);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_does_not_reach_non_members() {
        let (registry, rooms) = services();
        let _rx_a = connect(&registry, "u-1", "conn-a").await;
        let mut rx_b = connect(&registry, "u-2", "conn-b").await;

        let parts = participants(&["u-1"]);
        rooms.join("c-1", "u-1", &parts).await.unwrap();

        rooms
            .broadcast(
                "c-1",
                &ServerMessage::UserOnline {
                    user_id: "u-1".into(),
                },
                None,
            )
            .await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_shared_hits_each_peer_once_across_rooms() {
        let (registry, rooms) = services();
        let _rx_1 = connect(&registry, "u-1", "conn-1").await;
        let mut rx_2 = connect(&registry, "u-2", "conn-2").await;

        // u-1 and u-2 share two rooms; the shared fan-out must not double up
        let parts = participants(&["u-1", "u-2"]);
        for room in ["c-a", "c-b"] {
            rooms.join(room, "u-1", &parts).await.unwrap();
            rooms.join(room, "u-2", &parts).await.unwrap();
        }

        rooms
            .broadcast_to_shared(
                "u-1",
                &ServerMessage::UserAvatarUpdated {
                    user_id: "u-1".into(),
                    avatar_url: "/a.png".into(),
                },
            )
            .await;
        assert!(rx_2.try_recv().is_ok());
        assert!(rx_2.try_recv().is_err());
    }
}
