//! Set of live viewer connections.

use std::collections::HashMap;
use std::sync::Arc;

use gomer_core::ConnectionId;
use parking_lot::RwLock;
use tracing::debug;

use super::connection::ClientConnection;

/// Live connections keyed by [`ConnectionId`].
///
/// Every operation holds the lock only for the in-memory update; nothing here
/// waits on the network.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let id = connection.id.clone();
        let count = {
            let mut conns = self.connections.write();
            let _ = conns.insert(id.clone(), connection);
            conns.len()
        };
        debug!(connection_id = %id, count, "connection registered");
    }

    /// Unregister a connection, returning it if it was present.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Connections registered right now.
    ///
    /// The snapshot is independent of the registry; later adds and removes do
    /// not affect it.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Look up one connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
