use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use stayfit_gateway::token;
use stayfit_types::api::{AuthResponse, LoginRequest, RegisterRequest, UserProfile};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    // Validate input
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::BadRequest("Username must be 3-32 characters".into()));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash failed: {}", e)))?
        .to_string();

    let (u, e) = (username.clone(), email.clone());
    let user_id = state
        .db(move |db| db.try_create_user(&u, &e, &password_hash))
        .await?
        .ok_or_else(|| ApiError::Conflict("Username or email already registered".into()))?;

    let user = UserProfile { id: user_id, username, email };
    let token = token::issue(&state.gateway.jwt_secret, &user, state.token_ttl)?;
    info!("registered user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());

    let email = req.email.trim().to_lowercase();
    let row = state
        .db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let user = UserProfile {
        id: row.id,
        username: row.username,
        email: row.email,
    };
    let token = token::issue(&state.gateway.jwt_secret, &user, state.token_ttl)?;

    Ok(Json(AuthResponse { user, token }))
}

pub async fn me(Extension(user): Extension<UserProfile>) -> Json<UserProfile> {
    Json(user)
}

/// Delete the caller's account and everything that references it.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Result<StatusCode, ApiError> {
    let id = user.id;
    state.db(move |db| db.delete_user(id)).await?;
    info!("deleted account {} ({})", user.username, user.id);
    Ok(StatusCode::NO_CONTENT)
}
