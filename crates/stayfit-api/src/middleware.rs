use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use stayfit_gateway::token;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer token, attaching the caller's
/// `UserProfile` to the request. Fails closed before any handler runs.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let bearer = match header_value {
        Some(value) => Some(token::bearer(value).ok_or_else(|| ApiError::Unauthorized("Invalid token".into()))?),
        None => None,
    };

    let user = token::verify(&state.gateway.jwt_secret, bearer)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
