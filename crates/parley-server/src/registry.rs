//! Registry of live connections, at most one per user.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_core::events::ServerEvent;
use parley_core::ids::UserId;

use crate::connection::Connection;
use crate::rooms::RoomIndex;

/// Owns every [`Connection`]. All mutation funnels through these methods;
/// the map itself is never exposed.
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Arc<Connection>>,
    rooms: Arc<RoomIndex>,
    max_send_queue: usize,
    next_epoch: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(rooms: Arc<RoomIndex>, max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms,
            max_send_queue,
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Register a connection for a user, returning the handle and the
    /// receiver its write task drains.
    ///
    /// Any prior connection for the same user is silently superseded: its
    /// entry is replaced here and its heartbeat loop observes the epoch
    /// change and self-terminates. It is not cancelled explicitly.
    pub fn register(&self, user_id: UserId) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(user_id.clone(), epoch, tx));

        if let Some(old) = self.connections.insert(user_id.clone(), Arc::clone(&conn)) {
            debug!(user_id = %user_id, old_epoch = old.epoch(), new_epoch = epoch,
                "connection superseded");
        }
        (conn, rx)
    }

    /// Remove a user's connection, cancel its heartbeat and drop the user
    /// from every room. Idempotent: absent users are a no-op.
    pub fn unregister(&self, user_id: &UserId) {
        if let Some((_, conn)) = self.connections.remove(user_id) {
            conn.cancel_heartbeat();
            debug!(user_id = %user_id, epoch = conn.epoch(), "connection unregistered");
        }
        self.rooms.purge_user(user_id);
    }

    /// Unregister only if the registered connection is still the given
    /// epoch. Safe to race against a concurrent re-register: a superseded
    /// caller becomes a no-op and the fresh connection survives.
    pub fn unregister_conn(&self, user_id: &UserId, epoch: u64) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, conn| conn.epoch() == epoch);
        match removed {
            Some((_, conn)) => {
                conn.cancel_heartbeat();
                self.rooms.purge_user(user_id);
                debug!(user_id = %user_id, epoch, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Whether this exact handle (user + epoch) is still registered.
    pub fn is_current(&self, conn: &Connection) -> bool {
        self.connections
            .get(conn.user_id())
            .map(|c| c.epoch() == conn.epoch())
            .unwrap_or(false)
    }

    /// Send an event to a user's connection.
    ///
    /// Any write failure reaps the connection as a side effect: the user is
    /// unregistered and purged from all rooms, and `false` is returned.
    pub fn send(&self, user_id: &UserId, event: &ServerEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return false;
            }
        };
        self.send_text(user_id, &json)
    }

    /// Send an already-serialized frame (fan-out paths serialize once).
    pub fn send_text(&self, user_id: &UserId, text: &str) -> bool {
        let Some(conn) = self.connections.get(user_id).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        if conn.send(text.to_string()) {
            return true;
        }
        warn!(user_id = %user_id, epoch = conn.epoch(), "write failed, reaping connection");
        self.unregister_conn(user_id, conn.epoch());
        false
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::ChatId;

    fn setup() -> (ConnectionRegistry, Arc<RoomIndex>) {
        let rooms = Arc::new(RoomIndex::new());
        (ConnectionRegistry::new(Arc::clone(&rooms), 32), rooms)
    }

    fn ping() -> ServerEvent {
        ServerEvent::Ping { ts: chrono::Utc::now() }
    }

    #[test]
    fn register_and_is_online() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        assert!(!registry.is_online(&user));

        let (_conn, _rx) = registry.register(user.clone());
        assert!(registry.is_online(&user));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn at_most_one_connection_per_user() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        let (first, _rx1) = registry.register(user.clone());
        let (second, mut rx2) = registry.register(user.clone());

        assert_eq!(registry.count(), 1);
        assert!(!registry.is_current(&first));
        assert!(registry.is_current(&second));

        // Sends reach the new handle only.
        assert!(registry.send(&user, &ping()));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn unregister_is_idempotent() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        let (_conn, _rx) = registry.register(user.clone());

        registry.unregister(&user);
        assert!(!registry.is_online(&user));
        registry.unregister(&user); // second call is a no-op
    }

    #[test]
    fn unregister_cancels_heartbeat_token() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        let (conn, _rx) = registry.register(user.clone());
        let token = conn.cancel_token();

        registry.unregister(&user);
        assert!(token.is_cancelled());
    }

    #[test]
    fn unregister_purges_rooms() {
        let (registry, rooms) = setup();
        let user = UserId::from_raw("user_a");
        let chat = ChatId::from_raw("c1");
        let (_conn, _rx) = registry.register(user.clone());
        rooms.join(user.clone(), chat.clone());

        registry.unregister(&user);
        assert!(rooms.members(&chat).is_empty());
    }

    #[test]
    fn unregister_conn_skips_superseded_epoch() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        let (old, _rx1) = registry.register(user.clone());
        let (_new, _rx2) = registry.register(user.clone());

        // The stale handle's cleanup must not tear down the new connection.
        assert!(!registry.unregister_conn(&user, old.epoch()));
        assert!(registry.is_online(&user));
    }

    #[test]
    fn send_to_offline_user_is_not_delivered() {
        let (registry, _) = setup();
        assert!(!registry.send(&UserId::from_raw("user_ghost"), &ping()));
    }

    #[tokio::test]
    async fn send_delivers_serialized_event() {
        let (registry, _) = setup();
        let user = UserId::from_raw("user_a");
        let (_conn, mut rx) = registry.register(user.clone());

        assert!(registry.send(&user, &ping()));
        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "ping");
    }

    #[test]
    fn send_failure_reaps_connection_and_rooms() {
        let (registry, rooms) = setup();
        let user = UserId::from_raw("user_a");
        let chat = ChatId::from_raw("c1");
        let (_conn, rx) = registry.register(user.clone());
        rooms.join(user.clone(), chat.clone());

        // Simulate a dead socket: the write task is gone.
        drop(rx);

        assert!(!registry.send(&user, &ping()));
        assert!(!registry.is_online(&user));
        assert!(rooms.members(&chat).is_empty());
    }
}
