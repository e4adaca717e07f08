use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use stayfit_db::models::FeedRow;
use stayfit_types::api::{
    CommentView, CreateCommentRequest, CreatePostRequest, PostView, ToggleResponse, UserProfile,
};
use stayfit_types::models::{CommentNotice, LikeNotice, Notification, PostNotice};

use crate::error::ApiError;
use crate::state::AppState;

const COMMENT_PREVIEW_CHARS: usize = 80;

/// Create a post and tell every friend about it.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caption = req.caption.trim().to_string();
    let media_url = req.media_url.filter(|u| !u.trim().is_empty());
    if caption.is_empty() && media_url.is_none() {
        return Err(ApiError::BadRequest("Post needs a caption or media".into()));
    }

    let me = user.id;
    let (post_id, friends) = state
        .db(move |db| {
            let id = db.create_post(me, &caption, media_url.as_deref())?;
            let friends: Vec<i64> = db.list_friends(me)?.into_iter().map(|f| f.id).collect();
            Ok((id, friends))
        })
        .await?;

    let notification = Notification::Post(PostNotice {
        post_id,
        author_id: user.id,
        author_username: user.username.clone(),
    });
    let stored = state.gateway.fanout.notify_all(user.id, &friends, &notification).await;
    debug!("post {} announced to {} friend(s)", post_id, stored);

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": post_id }))))
}

pub async fn feed(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let rows = state.db(move |db| db.feed(user.id)).await?;
    Ok(Json(rows.into_iter().map(feed_to_view).collect()))
}

pub async fn saved(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let rows = state.db(move |db| db.saved_posts(user.id)).await?;
    Ok(Json(rows.into_iter().map(feed_to_view).collect()))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let author = state
        .db(move |db| Ok(db.get_post(post_id)?.map(|p| p.user_id)))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    if author != user.id {
        return Err(ApiError::Forbidden("Only the author can delete a post".into()));
    }
    state.db(move |db| db.delete_post(post_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle a like; a new like notifies the author.
pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let author = visible_post_author(&state, post_id, user.id).await?;
    let me = user.id;
    let (active, count) = state.db(move |db| db.toggle_like(post_id, me)).await?;

    if active {
        state
            .notify(
                user.id,
                author,
                Notification::Like(LikeNotice {
                    post_id,
                    liker_id: user.id,
                    liker_username: user.username.clone(),
                }),
            )
            .await;
    }

    Ok(Json(ToggleResponse { active, count }))
}

pub async fn toggle_save(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<ToggleResponse>, ApiError> {
    visible_post_author(&state, post_id, user.id).await?;
    let (active, count) = state.db(move |db| db.toggle_save(post_id, user.id)).await?;
    Ok(Json(ToggleResponse { active, count }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Comment is empty".into()));
    }
    let author = visible_post_author(&state, post_id, user.id).await?;

    let me = user.id;
    let row = state.db(move |db| db.create_comment(post_id, me, &content)).await?;

    state
        .notify(
            user.id,
            author,
            Notification::Comment(CommentNotice {
                post_id,
                comment_id: row.id,
                commenter_id: user.id,
                commenter_username: user.username.clone(),
                preview: row.content.chars().take(COMMENT_PREVIEW_CHARS).collect(),
            }),
        )
        .await;

    let view = CommentView {
        id: row.id,
        post_id: row.post_id,
        user_id: row.user_id,
        username: row.username,
        content: row.content,
        created_at: stayfit_db::parse_timestamp(&row.created_at),
    };
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    visible_post_author(&state, post_id, user.id).await?;
    let rows = state.db(move |db| db.comments_for_post(post_id)).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| CommentView {
                id: row.id,
                post_id: row.post_id,
                user_id: row.user_id,
                username: row.username,
                content: row.content,
                created_at: stayfit_db::parse_timestamp(&row.created_at),
            })
            .collect(),
    ))
}

/// Posts are visible to their author and the author's friends.
/// Returns the author id.
async fn visible_post_author(state: &AppState, post_id: i64, viewer_id: i64) -> Result<i64, ApiError> {
    let (author, visible) = state
        .db(move |db| {
            let Some(post) = db.get_post(post_id)? else {
                return Ok(None);
            };
            let visible = post.user_id == viewer_id || db.are_friends(viewer_id, post.user_id)?;
            Ok(Some((post.user_id, visible)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    if !visible {
        return Err(ApiError::Forbidden("Post not visible".into()));
    }
    Ok(author)
}

fn feed_to_view(row: FeedRow) -> PostView {
    PostView {
        id: row.id,
        user_id: row.user_id,
        username: row.username,
        caption: row.caption,
        media_url: row.media_url,
        like_count: row.like_count as usize,
        comment_count: row.comment_count as usize,
        liked: row.liked,
        saved: row.saved,
        created_at: stayfit_db::parse_timestamp(&row.created_at),
    }
}
