use std::sync::Arc;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;
use crate::messaging::message_channel::MessageChannel;
use crate::transport::keep_alive_stream::ConnectionId;


/// The live connections of a server. Members are added when they are accepted and removed when
///  they break, and removal is what disposes a connection.
///
/// Iteration works on snapshots, so it is not affected by concurrent modification.
#[derive(Default)]
pub struct ConnectionSet {
    connections: RwLock<FxHashMap<ConnectionId, Arc<MessageChannel>>>,
}

impl ConnectionSet {
    /// returns `false` if the connection was already a member
    pub async fn add(&self, connection: Arc<MessageChannel>) -> bool {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&connection.id()) {
            return false;
        }
        connections.insert(connection.id(), connection);
        true
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<MessageChannel>> {
        self.connections.write().await
            .remove(&id)
    }

    /// Removing a connection that is not (or no longer) a member is a no-op that returns `false`.
    pub async fn remove_and_dispose(&self, id: ConnectionId) -> bool {
        match self.remove(id).await {
            Some(connection) => {
                debug!("disposing connection {}", id);
                connection.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await
            .contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await
            .len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<Arc<MessageChannel>> {
        self.connections.read().await
            .values()
            .cloned()
            .collect()
    }

    /// all members except the given one
    pub async fn others(&self, except: ConnectionId) -> Vec<Arc<MessageChannel>> {
        self.connections.read().await
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// removes all members, leaving it to the caller to dispose them
    pub async fn drain(&self) -> Vec<Arc<MessageChannel>> {
        self.connections.write().await
            .drain()
            .map(|(_, c)| c)
            .collect()
    }
}
