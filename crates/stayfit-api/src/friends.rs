use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use stayfit_types::api::{FriendRequestCreate, FriendRequestView, FriendView, UserProfile};
use stayfit_types::models::{FriendAcceptNotice, FriendRequestNotice, Notification};

use crate::error::ApiError;
use crate::state::AppState;

enum RequestCheck {
    UnknownUser,
    AlreadyFriends,
    Pending,
    Created(i64),
}

pub async fn send_request(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<FriendRequestCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let target = req.user_id;
    if target == user.id {
        return Err(ApiError::BadRequest("Cannot befriend yourself".into()));
    }

    let me = user.id;
    let check = state
        .db(move |db| {
            if db.get_user_by_id(target)?.is_none() {
                return Ok(RequestCheck::UnknownUser);
            }
            if db.are_friends(me, target)? {
                return Ok(RequestCheck::AlreadyFriends);
            }
            if db.pending_request_between(me, target)? {
                return Ok(RequestCheck::Pending);
            }
            db.create_friend_request(me, target).map(RequestCheck::Created)
        })
        .await?;

    let request_id = match check {
        RequestCheck::UnknownUser => return Err(ApiError::NotFound("User not found".into())),
        RequestCheck::AlreadyFriends => return Err(ApiError::Conflict("Already friends".into())),
        RequestCheck::Pending => return Err(ApiError::Conflict("Friend request already pending".into())),
        RequestCheck::Created(id) => id,
    };

    state
        .notify(
            user.id,
            target,
            Notification::FriendRequest(FriendRequestNotice {
                request_id,
                from_user_id: user.id,
                from_username: user.username.clone(),
            }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": request_id }))))
}

pub async fn incoming_requests(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<FriendRequestView>>, ApiError> {
    let rows = state.db(move |db| db.incoming_friend_requests(user.id)).await?;
    Ok(Json(
        rows.into_iter()
            .map(|r| FriendRequestView {
                id: r.id,
                from_user_id: r.sender_id,
                from_username: r.sender_username,
                created_at: stayfit_db::parse_timestamp(&r.created_at),
            })
            .collect(),
    ))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let me = user.id;
    let requester = state
        .db(move |db| {
            let Some(request) = db.get_friend_request(request_id)? else {
                return Ok(None);
            };
            if request.receiver_id != me {
                return Ok(None);
            }
            db.accept_friend_request(request_id)?;
            Ok(Some(request.sender_id))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Friend request not found".into()))?;

    info!("{} and {} are now friends", requester, user.id);
    state
        .notify(
            user.id,
            requester,
            Notification::FriendAccept(FriendAcceptNotice {
                friend_id: user.id,
                friend_username: user.username.clone(),
            }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Either side may drop a pending request.
pub async fn decline_request(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .db(move |db| {
            match db.get_friend_request(request_id)? {
                Some(r) if r.receiver_id == user.id || r.sender_id == user.id => {
                    db.delete_friend_request(request_id)
                }
                _ => Ok(false),
            }
        })
        .await?;
    if !removed {
        return Err(ApiError::NotFound("Friend request not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<FriendView>>, ApiError> {
    let rows = state.db(move |db| db.list_friends(user.id)).await?;
    Ok(Json(
        rows.into_iter()
            .map(|f| FriendView { id: f.id, username: f.username })
            .collect(),
    ))
}

pub async fn remove_friend(
    State(state): State<AppState>,
    Path(friend_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let removed = state.db(move |db| db.remove_friendship(user.id, friend_id)).await?;
    if !removed {
        return Err(ApiError::NotFound("Not friends".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}
