use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use stayfit_gateway::delivery::row_to_message;
use stayfit_types::api::{
    ConversationSummary, ConversationsResponse, HistoryQuery, MessageWithReactions, MessagesResponse,
    UserProfile,
};

use crate::error::ApiError;
use crate::state::AppState;

/// One page of chat history with one friend, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(other_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let history = state
        .gateway
        .engine
        .history(user.id, other_id, query.limit, query.before)
        .await?;

    let messages = history
        .into_iter()
        .map(|(message, reactions)| MessageWithReactions { message, reactions })
        .collect();

    Ok(Json(MessagesResponse { messages }))
}

/// Latest message per conversation partner.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let rows = state.db(move |db| db.latest_conversations(user.id)).await?;

    let conversations = rows
        .into_iter()
        .map(|row| ConversationSummary {
            partner_id: row.partner_id,
            partner_username: row.partner_username,
            last_message: row_to_message(row.last_message),
        })
        .collect();

    Ok(Json(ConversationsResponse { conversations }))
}

/// Sender-only delete; reactions are removed first and both participants
/// get `message:deleted`.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    state
        .gateway
        .engine
        .delete_message(message_id, user.id)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Forbidden(_) => ApiError::Forbidden("Only the sender can delete a message".into()),
            other => other,
        })?;
    Ok(StatusCode::NO_CONTENT)
}
