use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::warn;

use stayfit_db::models::NotificationRow;
use stayfit_types::api::{
    MarkReadRequest, NotificationQuery, NotificationView, NotificationsResponse, UpdatedResponse, UserProfile,
};
use stayfit_types::models::Notification;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let kind = query
        .kind
        .filter(|k| !k.is_empty())
        .map(|k| Notification::canonical_kind(&k).to_string());
    let (rows, unread) = state
        .db(move |db| {
            let rows = db.list_notifications(user.id, kind.as_deref())?;
            let unread = db.unread_notification_count(user.id)?;
            Ok((rows, unread))
        })
        .await?;

    let notifications = rows.into_iter().filter_map(row_to_view).collect();
    Ok(Json(NotificationsResponse { notifications, unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<UpdatedResponse>, ApiError> {
    let updated = state
        .db(move |db| db.mark_notifications_read(user.id, &req.ids))
        .await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<UpdatedResponse>, ApiError> {
    let updated = state.db(move |db| db.mark_all_notifications_read(user.id)).await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let removed = state.db(move |db| db.delete_notification(user.id, id)).await?;
    if !removed {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Rows whose payload no longer parses are skipped rather than failing the list.
fn row_to_view(row: NotificationRow) -> Option<NotificationView> {
    let parsed = serde_json::from_str(&row.data)
        .and_then(|data| Notification::from_parts(&row.kind, data));
    match parsed {
        Ok(notification) => Some(NotificationView {
            id: row.id,
            notification,
            read: row.read,
            created_at: stayfit_db::parse_timestamp(&row.created_at),
        }),
        Err(e) => {
            warn!("Corrupt notification {} ({}): {}", row.id, row.kind, e);
            None
        }
    }
}
