use axum::{
    Extension, Json,
    extract::{Path, State},
};

use stayfit_types::api::{ReactionsResponse, ToggleReactionRequest, UserProfile};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<ReactionsResponse>, ApiError> {
    let reactions = state.gateway.engine.reactions(message_id, user.id).await?;
    Ok(Json(ReactionsResponse { message_id, reactions }))
}

/// Toggle the caller's reaction; both participants receive `reaction:update`.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionsResponse>, ApiError> {
    let reactions = state
        .gateway
        .engine
        .toggle_reaction(message_id, user.id, &req.emoji)
        .await?;
    Ok(Json(ReactionsResponse { message_id, reactions }))
}
