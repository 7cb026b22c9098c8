//! Process-wide registry of open connections.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use marionette_core::ConnectionId;
use marionette_rpc::ConnectionDirectory;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::ClientConnection;

/// Open connections indexed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection. Returns whether it was present.
    pub async fn remove(&self, id: &ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        conns.remove(id).is_some()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl ConnectionDirectory for ConnectionRegistry {
    async fn deregister(&self, id: &ConnectionId) {
        if self.remove(id).await {
            debug!(connection_id = %id, "connection deregistered");
        }
    }
}
