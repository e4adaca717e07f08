use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};

use stayfit_db::models::{ParticipantRow, WorkoutRow};
use stayfit_db::workouts::{STATUS_ACCEPTED, STATUS_DECLINED, STATUS_OPTED_OUT};
use stayfit_types::api::{
    CreateWorkoutRequest, ParticipantView, RespondWorkoutRequest, UserProfile, WorkoutView,
};
use stayfit_types::models::{Notification, WorkoutNotice, WorkoutOptOutNotice, WorkoutResponseNotice};

use crate::error::ApiError;
use crate::state::AppState;

/// Schedule a workout and invite friends. Invitees who are not friends of
/// the creator are dropped.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<CreateWorkoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workout = req.workout.trim().to_string();
    if workout.is_empty() {
        return Err(ApiError::BadRequest("Workout is required".into()));
    }
    let date = NaiveDate::parse_from_str(req.date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("Date must be YYYY-MM-DD".into()))?
        .format("%Y-%m-%d")
        .to_string();
    let time = NaiveTime::parse_from_str(req.time.trim(), "%H:%M")
        .map_err(|_| ApiError::BadRequest("Time must be HH:MM".into()))?
        .format("%H:%M")
        .to_string();

    let me = user.id;
    let mut requested = req.invitee_ids;
    requested.sort_unstable();
    requested.dedup();

    let (w, d, t) = (workout.clone(), date.clone(), time.clone());
    let (schedule_id, invitees) = state
        .db(move |db| {
            let mut invitees = Vec::with_capacity(requested.len());
            for id in requested {
                if id != me && db.are_friends(me, id)? {
                    invitees.push(id);
                }
            }
            let schedule_id = db.create_workout(me, &w, &d, &t, &invitees)?;
            Ok((schedule_id, invitees))
        })
        .await?;

    info!("{} scheduled {} for {} {} with {} invitee(s)", user.id, schedule_id, date, time, invitees.len());

    let notification = Notification::WorkoutInvite(WorkoutNotice {
        schedule_id,
        workout,
        date,
        time,
        creator_id: user.id,
        creator_username: user.username.clone(),
    });
    state.gateway.fanout.notify_all(user.id, &invitees, &notification).await;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": schedule_id }))))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<Json<Vec<WorkoutView>>, ApiError> {
    let views = state
        .db(move |db| {
            let mut views = Vec::new();
            for row in db.workouts_for_user(user.id)? {
                let participants = db.workout_participants(row.id)?;
                views.push(to_view(row, participants));
            }
            Ok(views)
        })
        .await?;
    Ok(Json(views))
}

/// Accept or decline an invite; the creator is told either way.
pub async fn respond(
    State(state): State<AppState>,
    Path(schedule_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
    Json(req): Json<RespondWorkoutRequest>,
) -> Result<StatusCode, ApiError> {
    let status = if req.accepted { STATUS_ACCEPTED } else { STATUS_DECLINED };
    let workout = set_status(&state, schedule_id, user.id, status).await?;

    state
        .notify(
            user.id,
            workout.creator_id,
            Notification::WorkoutResponse(WorkoutResponseNotice {
                schedule_id,
                workout: workout.workout,
                date: workout.date,
                time: workout.time,
                responder_id: user.id,
                responder_username: user.username.clone(),
                accepted: req.accepted,
            }),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn opt_out(
    State(state): State<AppState>,
    Path(schedule_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let workout = set_status(&state, schedule_id, user.id, STATUS_OPTED_OUT).await?;

    state
        .notify(
            user.id,
            workout.creator_id,
            Notification::WorkoutOptOut(WorkoutOptOutNotice {
                schedule_id,
                workout: workout.workout,
                date: workout.date,
                time: workout.time,
                user_id: user.id,
                username: user.username.clone(),
            }),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Creator-only. Invitees still in the schedule are told before it is removed.
pub async fn cancel(
    State(state): State<AppState>,
    Path(schedule_id): Path<i64>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let (workout, participants) = state
        .db(move |db| {
            let Some(workout) = db.get_workout(schedule_id)? else {
                return Ok(None);
            };
            let participants = db.workout_participants(schedule_id)?;
            Ok(Some((workout, participants)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Workout not found".into()))?;

    if workout.creator_id != user.id {
        return Err(ApiError::Forbidden("Only the creator can cancel a workout".into()));
    }

    state.db(move |db| db.delete_workout(schedule_id)).await?;

    let still_in: Vec<i64> = participants
        .into_iter()
        .filter(|p| p.status != STATUS_DECLINED && p.status != STATUS_OPTED_OUT)
        .map(|p| p.user_id)
        .collect();
    let notification = Notification::WorkoutCanceled(WorkoutNotice {
        schedule_id,
        workout: workout.workout,
        date: workout.date,
        time: workout.time,
        creator_id: user.id,
        creator_username: user.username.clone(),
    });
    let told = state.gateway.fanout.notify_all(user.id, &still_in, &notification).await;
    debug!("workout {} canceled, {} participant(s) told", schedule_id, told);

    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    state: &AppState,
    schedule_id: i64,
    user_id: i64,
    status: &'static str,
) -> Result<WorkoutRow, ApiError> {
    state
        .db(move |db| {
            let Some(workout) = db.get_workout(schedule_id)? else {
                return Ok(None);
            };
            if !db.set_participant_status(schedule_id, user_id, status)? {
                return Ok(None);
            }
            Ok(Some(workout))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Workout invite not found".into()))
}

fn to_view(row: WorkoutRow, participants: Vec<ParticipantRow>) -> WorkoutView {
    WorkoutView {
        id: row.id,
        creator_id: row.creator_id,
        creator_username: row.creator_username,
        workout: row.workout,
        date: row.date,
        time: row.time,
        participants: participants
            .into_iter()
            .map(|p| ParticipantView {
                user_id: p.user_id,
                username: p.username,
                status: p.status,
            })
            .collect(),
    }
}
