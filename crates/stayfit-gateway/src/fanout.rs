use std::sync::Arc;

use tracing::{debug, error};

use stayfit_db::Database;
use stayfit_db::models::NotificationRow;
use stayfit_types::events::{NotificationEnvelope, ServerEvent};
use stayfit_types::models::Notification;

use crate::blocking;
use crate::error::DeliveryError;
use crate::registry::RoomRegistry;

/// Turns social mutations into notification rows and pushes them live.
///
/// The row is the durable record; the push is fire-and-forget, so an offline
/// recipient finds it on their next fetch.
#[derive(Clone)]
pub struct NotificationFanout {
    db: Arc<Database>,
    registry: RoomRegistry,
}

impl NotificationFanout {
    pub fn new(db: Arc<Database>, registry: RoomRegistry) -> Self {
        Self { db, registry }
    }

    /// Store and push one notification about `actor_id`'s action to `target_id`.
    /// Users are never notified about their own actions: returns `None` then.
    pub async fn notify(
        &self,
        actor_id: i64,
        target_id: i64,
        notification: Notification,
    ) -> Result<Option<i64>, DeliveryError> {
        if actor_id == target_id {
            return Ok(None);
        }
        self.deliver(target_id, notification).await.map(Some)
    }

    /// Notify several targets. A failure for one target is logged and does
    /// not stop the others. Returns how many rows were stored.
    pub async fn notify_all(&self, actor_id: i64, targets: &[i64], notification: &Notification) -> usize {
        let mut stored = 0;
        for &target in targets {
            match self.notify(actor_id, target, notification.clone()).await {
                Ok(Some(_)) => stored += 1,
                Ok(None) => {}
                Err(e) => error!("notification {} to user {} failed: {}", notification.kind(), target, e),
            }
        }
        stored
    }

    /// Store and push without the self-notification check (system events
    /// such as reminders have no actor).
    pub async fn deliver(&self, target_id: i64, notification: Notification) -> Result<i64, DeliveryError> {
        let (kind, data) = notification
            .to_parts()
            .map_err(|e| DeliveryError::Storage(e.into()))?;
        let data = data.to_string();

        let row: NotificationRow = blocking(&self.db, move |db| db.insert_notification(target_id, kind, &data)).await?;

        let envelope = NotificationEnvelope {
            id: row.id,
            notification,
            created_at: stayfit_db::parse_timestamp(&row.created_at),
        };
        let delivered = self
            .registry
            .broadcast(target_id, ServerEvent::NotificationNew(envelope))
            .await;
        debug!(
            "notification {} ({}) for user {} pushed to {} connection(s)",
            row.id, kind, target_id, delivered
        );

        Ok(row.id)
    }
}
