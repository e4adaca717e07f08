use std::sync::Arc;

use stayfit_db::Database;
use stayfit_gateway::Gateway;
use stayfit_types::models::Notification;
use tracing::error;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gateway: Gateway,
    pub token_ttl: chrono::Duration,
}

impl AppStateInner {
    /// Run blocking SQLite work off the async runtime
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
            .map_err(ApiError::Internal)
    }

    /// Fan a notification out after the mutation has committed. A failure here
    /// is logged; the mutation itself already succeeded.
    pub async fn notify(&self, actor_id: i64, target_id: i64, notification: Notification) {
        let kind = notification.kind();
        if let Err(e) = self.gateway.fanout.notify(actor_id, target_id, notification).await {
            error!("{} notification for user {} failed: {}", kind, target_id, e);
        }
    }
}
