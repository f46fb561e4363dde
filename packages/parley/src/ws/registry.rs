//! Session Registry
//!
//! Maps verified user identities to their live transport connections. A user
//! may hold several concurrent sessions (multi-device); they transition
//! online on the first registered connection and offline on removal of the
//! last. The transition value is computed inside the registry's write lock so
//! it is produced exactly once per transition, never twice.
//!
//! The registry also owns each connection's outbound send handle. Sends never
//! block: a full outbound queue cancels that connection (disconnect-on-
//! overflow) so one slow client cannot stall a broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::ServerMessage;
use crate::metrics::ServerMetrics;

/// Outbound half of one connection: the bounded event queue and the token
/// that tears the connection down when cancelled.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub tx: mpsc::Sender<ServerMessage>,
    pub cancel: CancellationToken,
}

/// One authenticated transport connection.
#[derive(Debug)]
struct Session {
    user_id: String,
    connected_at: DateTime<Utc>,
    handle: SessionHandle,
}

/// An online/offline edge produced by a registry mutation. Reported to the
/// Presence Tracker by the connection handler, exactly once per edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline(String),
    WentOffline(String),
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Session>,
    by_user: HashMap<String, HashSet<String>>,
}

pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    metrics: Arc<ServerMetrics>,
}

impl SessionRegistry {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            metrics,
        }
    }

    /// Record an authenticated connection. Idempotent per connection id: a
    /// second registration of the same connection is a no-op.
    ///
    /// Returns `CameOnline` iff this is the user's first live connection.
    pub async fn register(
        &self,
        user_id: &str,
        connection_id: &str,
        handle: SessionHandle,
    ) -> Option<PresenceTransition> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(connection_id) {
            return None;
        }

        inner.sessions.insert(
            connection_id.to_string(),
            Session {
                user_id: user_id.to_string(),
                connected_at: Utc::now(),
                handle,
            },
        );
        let connections = inner.by_user.entry(user_id.to_string()).or_default();
        let first = connections.is_empty();
        connections.insert(connection_id.to_string());

        debug!(
            "[REGISTRY] registered connection {} for user {} ({} total)",
            connection_id,
            user_id,
            connections.len()
        );
        first.then(|| PresenceTransition::CameOnline(user_id.to_string()))
    }

    /// Remove a connection. Idempotent: removing an unknown connection is a
    /// no-op. Returns `WentOffline` iff this was the user's last connection.
    pub async fn unregister(&self, connection_id: &str) -> Option<PresenceTransition> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(connection_id)?;
        let uptime = Utc::now() - session.connected_at;
        debug!(
            "[REGISTRY] unregistered connection {} for user {} after {}s",
            connection_id,
            session.user_id,
            uptime.num_seconds()
        );

        let last = match inner.by_user.get_mut(&session.user_id) {
            Some(connections) => {
                connections.remove(connection_id);
                connections.is_empty()
            }
            None => false,
        };
        if last {
            inner.by_user.remove(&session.user_id);
            return Some(PresenceTransition::WentOffline(session.user_id));
        }
        None
    }

    /// The set of live connection ids for a user.
    pub async fn connections_for(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .await
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.read().await.by_user.contains_key(user_id)
    }

    /// Deliver an event to one connection. Never blocks: a full queue cancels
    /// the connection and counts the event as dropped.
    pub async fn send_to_connection(&self, connection_id: &str, event: &ServerMessage) -> bool {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(connection_id) else {
            return false;
        };
        self.try_deliver(connection_id, session, event)
    }

    /// Deliver an event to every live connection of a user.
    pub async fn send_to_user(&self, user_id: &str, event: &ServerMessage) -> usize {
        self.send_to_user_except(user_id, event, None).await
    }

    /// Deliver to every live connection of a user, optionally skipping one
    /// connection (the caller's echo-suppression decision).
    pub async fn send_to_user_except(
        &self,
        user_id: &str,
        event: &ServerMessage,
        exclude_connection: Option<&str>,
    ) -> usize {
        let inner = self.inner.read().await;
        let Some(connections) = inner.by_user.get(user_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in connections {
            if exclude_connection == Some(connection_id.as_str()) {
                continue;
            }
            if let Some(session) = inner.sessions.get(connection_id) {
                if self.try_deliver(connection_id, session, event) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Cancel every live connection (server shutdown).
    pub async fn close_all(&self) {
        let inner = self.inner.read().await;
        for session in inner.sessions.values() {
            session.handle.cancel.cancel();
        }
    }

    fn try_deliver(&self, connection_id: &str, session: &Session, event: &ServerMessage) -> bool {
        match session.handle.tx.try_send(event.clone()) {
            Ok(()) => {
                self.metrics.event_delivered();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Slow receiver: drop it rather than stall the multiplexer
                warn!(
                    "[REGISTRY] outbound queue full for connection {} (user {}), disconnecting",
                    connection_id, session.user_id
                );
                self.metrics.event_dropped();
                session.handle.cancel.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            SessionHandle {
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(ServerMetrics::new()))
    }

    #[tokio::test]
    async fn first_connection_comes_online() {
        let reg = registry();
        let (h, _rx) = handle(8);
        let t = reg.register("u-1", "conn-1", h).await;
        assert_eq!(t, Some(PresenceTransition::CameOnline("u-1".into())));
        assert!(reg.is_online("u-1").await);
    }

    #[tokio::test]
    async fn second_device_is_not_a_transition() {
        let reg = registry();
        let (h1, _rx1) = handle(8);
        let (h2, _rx2) = handle(8);
        reg.register("u-1", "conn-1", h1).await;
        let t = reg.register("u-1", "conn-2", h2).await;
        assert_eq!(t, None);
        assert_eq!(reg.connections_for("u-1").await.len(), 2);
    }

    #[tokio::test]
    async fn register_is_idempotent_per_connection() {
        let reg = registry();
        let (h1, _rx1) = handle(8);
        let (h2, _rx2) = handle(8);
        assert!(reg.register("u-1", "conn-1", h1).await.is_some());
        // Same connection id again: no-op, no second transition
        assert!(reg.register("u-1", "conn-1", h2).await.is_none());
        assert_eq!(reg.connections_for("u-1").await.len(), 1);
    }

    #[tokio::test]
    async fn last_disconnect_goes_offline_exactly_once() {
        let reg = registry();
        let (h1, _rx1) = handle(8);
        let (h2, _rx2) = handle(8);
        reg.register("u-1", "conn-1", h1).await;
        reg.register("u-1", "conn-2", h2).await;

        assert_eq!(reg.unregister("conn-1").await, None);
        assert_eq!(
            reg.unregister("conn-2").await,
            Some(PresenceTransition::WentOffline("u-1".into()))
        );
        assert!(!reg.is_online("u-1").await);

        // Repeated unregister is a no-op, never a second transition
        assert_eq!(reg.unregister("conn-2").await, None);
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_device_once() {
        let reg = registry();
        let (h1, mut rx1) = handle(8);
        let (h2, mut rx2) = handle(8);
        reg.register("u-1", "conn-1", h1).await;
        reg.register("u-1", "conn-2", h2).await;

        let n = reg
            .send_to_user(
                "u-1",
                &ServerMessage::UserOnline {
                    user_id: "u-2".into(),
                },
            )
            .await;
        assert_eq!(n, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_except_skips_origin_connection() {
        let reg = registry();
        let (h1, mut rx1) = handle(8);
        let (h2, mut rx2) = handle(8);
        reg.register("u-1", "conn-1", h1).await;
        reg.register("u-1", "conn-2", h2).await;

        let n = reg
            .send_to_user_except(
                "u-1",
                &ServerMessage::UserStopTyping {
                    conversation_id: "c-1".into(),
                },
                Some("conn-1"),
            )
            .await;
        assert_eq!(n, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn overflow_cancels_only_the_slow_connection() {
        let reg = registry();
        let (h1, _rx1) = handle(1); // rx never drained
        let (h2, mut rx2) = handle(8);
        let slow_cancel = h1.cancel.clone();
        let fast_cancel = h2.cancel.clone();
        reg.register("u-1", "conn-slow", h1).await;
        reg.register("u-1", "conn-fast", h2).await;

        let event = ServerMessage::UserOnline {
            user_id: "u-2".into(),
        };
        // First fills the slow queue, second overflows it
        reg.send_to_user("u-1", &event).await;
        reg.send_to_user("u-1", &event).await;

        assert!(slow_cancel.is_cancelled());
        assert!(!fast_cancel.is_cancelled());
        // The fast connection received both
        assert!(rx2.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_user_delivers_nothing() {
        let reg = registry();
        let n = reg
            .send_to_user(
                "ghost",
                &ServerMessage::UserOffline {
                    user_id: "u-1".into(),
                },
            )
            .await;
        assert_eq!(n, 0);
    }
}
