use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use stayfit_types::events::ServerEvent;
use stayfit_types::models::user_room;

/// Outbound half of one live connection.
pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

/// Maps each authenticated connection to its owner's `user:<id>` room.
/// A user may hold many connections (tabs, devices); all share one room.
///
/// All membership changes go through the one `RwLock`, so joins, leaves and
/// broadcasts never observe a half-updated room.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> (conn_id -> sender)
    rooms: RwLock<HashMap<i64, HashMap<Uuid, ConnectionSender>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh outbound channel and join it to the user's room.
    /// Returns (conn_id, receiver).
    pub async fn connect(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.join(user_id, conn_id, tx).await;
        (conn_id, rx)
    }

    /// Join a connection to `user:<user_id>`. Joining again with the same
    /// conn_id replaces the sender, so the call is idempotent.
    pub async fn join(&self, user_id: i64, conn_id: Uuid, tx: ConnectionSender) {
        self.inner
            .rooms
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        debug!("connection {} joined {}", conn_id, user_room(user_id));
    }

    /// Remove a connection from its room; the room disappears with its last member.
    pub async fn leave(&self, user_id: i64, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(room) = rooms.get_mut(&user_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&user_id);
            }
        }
    }

    /// Deliver an event to every connection in `user:<user_id>`.
    /// Offline users are a silent no-op. Returns how many connections took it.
    pub async fn broadcast(&self, user_id: i64, event: ServerEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(room) = rooms.get(&user_id) else {
            return 0;
        };
        room.values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Send an event to one specific connection only.
    pub async fn send_to_connection(&self, user_id: i64, conn_id: Uuid, event: ServerEvent) -> bool {
        let rooms = self.inner.rooms.read().await;
        rooms
            .get(&user_id)
            .and_then(|room| room.get(&conn_id))
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
