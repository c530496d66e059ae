//! Presence tracking: user id → set of live connection handles.
//!
//! An entry exists only while the user has at least one live connection and
//! is removed entirely on the last disconnect. Register/unregister are safe
//! under concurrent connect/disconnect of the same user (multi-device); the
//! caller is told when the user's online state transitioned so it can hand a
//! best-effort presence notification to the fanout dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ws::ConnectionSender;

/// Opaque handle identifying one live connection of a user.
pub type ConnectionId = u64;

/// One live connection: its id plus the outbound event channel.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: DashMap<String, Vec<Connection>>,
    next_id: AtomicU64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live connection for a user.
    /// Returns the connection id and whether the user just came online
    /// (this was their first live connection).
    pub fn register(&self, user_id: &str, sender: ConnectionSender) -> (ConnectionId, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.entries.entry(user_id.to_string()).or_default();
        entry.push(Connection { id, sender });
        let came_online = entry.len() == 1;
        (id, came_online)
    }

    /// Unregister a connection. Unconditional and immediate — never waits on
    /// in-flight dispatch. Removes the presence entry when this was the
    /// user's last connection, and reports that transition.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        // The occupied-entry API keeps retain + remove-on-empty atomic with
        // respect to a concurrent register for the same user.
        if let Entry::Occupied(mut occupied) = self.entries.entry(user_id.to_string()) {
            occupied.get_mut().retain(|c| c.id != connection_id);
            if occupied.get().is_empty() {
                occupied.remove();
                return true;
            }
        }
        false
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of a user's live connections.
    pub fn connections_for(&self, user_id: &str) -> Vec<Connection> {
        self.entries
            .get(user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Snapshot of every connection of every online user.
    pub fn all_connections(&self) -> Vec<Connection> {
        self.entries
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    /// Ids of all currently online users, for the connect-time snapshot event.
    pub fn online_user_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> ConnectionSender {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[test]
    fn first_register_brings_user_online() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online("alice"));

        let (_, came_online) = tracker.register("alice", sender());
        assert!(came_online);
        assert!(tracker.is_online("alice"));
    }

    #[test]
    fn second_device_does_not_retransition() {
        let tracker = PresenceTracker::new();
        let (first, came_online) = tracker.register("alice", sender());
        assert!(came_online);
        let (second, came_online) = tracker.register("alice", sender());
        assert!(!came_online);

        // Dropping one device keeps the user online
        assert!(!tracker.unregister("alice", first));
        assert!(tracker.is_online("alice"));

        // Last disconnect removes the entry entirely
        assert!(tracker.unregister("alice", second));
        assert!(!tracker.is_online("alice"));
        assert!(tracker.connections_for("alice").is_empty());
    }

    #[test]
    fn unregister_unknown_user_is_a_no_op() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.unregister("ghost", 42));
    }

    #[test]
    fn online_user_ids_reflects_live_entries() {
        let tracker = PresenceTracker::new();
        let (a, _) = tracker.register("alice", sender());
        tracker.register("bob", sender());

        let mut online = tracker.online_user_ids();
        online.sort();
        assert_eq!(online, vec!["alice", "bob"]);

        tracker.unregister("alice", a);
        assert_eq!(tracker.online_user_ids(), vec!["bob"]);
    }

    #[test]
    fn concurrent_register_unregister_same_user() {
        use std::sync::Arc;
        let tracker = Arc::new(PresenceTracker::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let t = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let (id, _) = t.register("alice", {
                        let (tx, _rx) = mpsc::unbounded_channel();
                        tx
                    });
                    t.unregister("alice", id);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // Every register was paired with an unregister — no entry survives.
        assert!(!tracker.is_online("alice"));
    }
}
