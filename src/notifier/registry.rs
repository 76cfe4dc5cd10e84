//! Connection registry
//!
//! Maps a user to the single push channel currently authenticated as that
//! user. Entries are added when a socket authenticates and removed when it
//! disconnects. Nothing is persisted: after a restart a user is invisible to
//! the notifier until they reconnect.

use bson::oid::ObjectId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::events::PushEvent;

/// Sender half of one socket's outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: mpsc::UnboundedSender<PushEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the socket task drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    /// Queue an event; `false` when the socket task has gone away
    pub fn send(&self, event: PushEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ObjectId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `user_id`, replacing any previous connection.
    ///
    /// Returns the replaced handle.
    pub fn register(&self, user_id: ObjectId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        debug!(user_id = %user_id, connection_id = %handle.id, "Registering connection");
        self.connections.insert(user_id, handle)
    }

    /// Remove whichever user is registered with `connection_id`.
    ///
    /// A connection that never authenticated, or that was already replaced
    /// by a newer one, is a no-op.
    pub fn deregister(&self, connection_id: Uuid) -> Option<ObjectId> {
        let user_id = self
            .connections
            .iter()
            .find(|entry| entry.value().id == connection_id)
            .map(|entry| *entry.key())?;

        // Re-check under the shard lock: the user may have reconnected
        let removed = self
            .connections
            .remove_if(&user_id, |_, handle| handle.id == connection_id);

        removed.map(|(user_id, _)| {
            debug!(user_id = %user_id, connection_id = %connection_id, "Deregistered connection");
            user_id
        })
    }

    pub fn lookup(&self, user_id: &ObjectId) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the connected users
    pub fn connected_users(&self) -> Vec<ObjectId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let user = ObjectId::new();
        let (handle, _rx) = ConnectionHandle::new();
        let id = handle.id;

        assert!(registry.register(user, handle).is_none());
        assert_eq!(registry.lookup(&user).map(|h| h.id), Some(id));
        assert_eq!(registry.connected_users(), vec![user]);
    }

    #[test]
    fn test_deregister_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new();
        registry.register(ObjectId::new(), handle);

        assert_eq!(registry.deregister(Uuid::new_v4()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let user = ObjectId::new();
        let (old, _old_rx) = ConnectionHandle::new();
        let (new, _new_rx) = ConnectionHandle::new();
        let old_id = old.id;
        let new_id = new.id;

        registry.register(user, old);
        let replaced = registry.register(user, new);
        assert_eq!(replaced.map(|h| h.id), Some(old_id));

        assert_eq!(registry.deregister(old_id), None);
        assert_eq!(registry.lookup(&user).map(|h| h.id), Some(new_id));

        assert_eq!(registry.deregister(new_id), Some(user));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_fails_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::new();
        assert!(handle.send(PushEvent::Pong));
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(PushEvent::Pong));
    }
}
