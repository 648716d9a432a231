use crate::utils::random_id;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

pub type ConnectionId = String;

/// Relay-side handle to one client's transport session
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    pub origin: Option<String>,
    pub connected_at: DateTime<Utc>,
    outbound: UnboundedSender<Message>,
}

impl Connection {
    pub fn new(
        remote_addr: Option<SocketAddr>,
        origin: Option<String>,
        outbound: UnboundedSender<Message>,
    ) -> Self {
        Self {
            id: random_id(),
            remote_addr,
            origin,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// False once the connection's writer has gone away
    pub fn is_alive(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// The open-connection set.
///
/// "The other peer" is every other registered connection; nothing here
/// pairs connections, so a frame is fanned out to all of them.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Nothing panics while holding the lock, but a poisoned set is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection, returning the new open-connection count
    pub fn register(&self, connection: Connection) -> usize {
        let mut connections = self.lock();
        connections.push(connection);
        connections.len()
    }

    /// Remove a connection; returns false if it was not registered
    pub fn unregister(&self, id: &str) -> bool {
        let mut connections = self.lock();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        connections.len() != before
    }

    /// Queue `message` on every registered connection except `sender`.
    ///
    /// Best effort: a connection whose writer is gone is skipped silently.
    /// Returns how many connections accepted the frame.
    pub fn broadcast_except(&self, sender: &str, message: &Message) -> usize {
        let connections = self.lock();
        connections
            .iter()
            .filter(|c| c.id != sender)
            .filter(|c| c.outbound.send(message.clone()).is_ok())
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().iter().map(|c| c.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Connection> {
        self.lock().clone()
    }
}
