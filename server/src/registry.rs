use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// One live WebSocket connection belonging to a user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: ConnectionSender,
}

/// Registry of live WebSocket connections per user.
///
/// A user can have multiple concurrent connections (multiple devices/tabs).
/// Came-online and went-offline transitions are decided inside the per-key
/// entry lock, so concurrent register/unregister calls for the same user
/// cannot both report the same transition.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<i64, Vec<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for a user. Returns true when this was the user's
    /// first live connection (the user just came online). Registering the
    /// same handle id twice is a no-op.
    pub fn register(&self, user_id: i64, handle: ConnectionHandle) -> bool {
        let mut entry = self.connections.entry(user_id).or_default();
        let came_online = entry.is_empty();
        if entry.iter().all(|existing| existing.id != handle.id) {
            entry.push(handle);
        }
        came_online
    }

    /// Remove one connection by id, sweeping out any handles whose channel
    /// already closed. Returns true when the user's last connection is gone
    /// (the user just went offline). The empty vec is removed under the same
    /// entry lock, so a user id is present iff it has live handles.
    pub fn unregister(&self, user_id: i64, connection_id: Uuid) -> bool {
        match self.connections.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                let handles = occupied.get_mut();
                handles.retain(|h| h.id != connection_id && !h.sender.is_closed());
                if handles.is_empty() {
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Senders for every live connection of one user.
    pub fn senders_for(&self, user_id: i64) -> Vec<ConnectionSender> {
        self.connections
            .get(&user_id)
            .map(|handles| handles.iter().map(|h| h.sender.clone()).collect())
            .unwrap_or_default()
    }

    /// Senders for every live connection on the server.
    pub fn all_senders(&self) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|h| h.sender.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.connections
            .get(&user_id)
            .map(|handles| !handles.is_empty())
            .unwrap_or(false)
    }

    /// Sorted ids of all users with at least one live connection.
    pub fn online_user_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.connections
            .get(&user_id)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }
}
