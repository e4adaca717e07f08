use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use stayfit_types::api::{Claims, UserProfile};

/// Why a token was refused. The display strings are what clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("No token")]
    Missing,

    #[error("Invalid token")]
    Invalid,
}

/// Verify a bearer token and return the identity it carries.
/// Shared by the HTTP middleware and the socket handshake.
pub fn verify(secret: &str, token: Option<&str>) -> Result<UserProfile, TokenError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| TokenError::Invalid)?;

    Ok(UserProfile {
        id: data.claims.sub,
        username: data.claims.username,
        email: data.claims.email,
    })
}

pub fn issue(secret: &str, user: &UserProfile, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}
