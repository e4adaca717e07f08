pub mod connection;
pub mod delivery;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod reminders;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use stayfit_db::Database;

use crate::delivery::DeliveryEngine;
use crate::fanout::NotificationFanout;
use crate::registry::RoomRegistry;

/// Everything a socket connection needs, cloned into each connection task.
#[derive(Clone)]
pub struct Gateway {
    pub registry: RoomRegistry,
    pub engine: DeliveryEngine,
    pub fanout: NotificationFanout,
    pub jwt_secret: Arc<str>,
    pub handshake_timeout: Duration,
}

impl Gateway {
    pub fn new(db: Arc<Database>, jwt_secret: &str, handshake_timeout: Duration) -> Self {
        let registry = RoomRegistry::new();
        Self {
            engine: DeliveryEngine::new(db.clone(), registry.clone()),
            fanout: NotificationFanout::new(db, registry.clone()),
            registry,
            jwt_secret: Arc::from(jwt_secret),
            handshake_timeout,
        }
    }
}

/// Run blocking SQLite work off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, error::DeliveryError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking join error: {}", e);
            error::DeliveryError::Join
        })?
        .map_err(error::DeliveryError::Storage)
}
