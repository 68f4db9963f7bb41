use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Session token claims: user identity plus expiry. Tokens are
/// self-contained; nothing is stored server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
}

/// Issue a signed session token valid for `hours` (12 by default, from
/// config).
pub fn issue(secret: &str, user_id: &str, email: &str, hours: u64) -> AppResult<String> {
    let exp = Utc::now() + Duration::hours(hours as i64);
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: exp.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

/// Verify signature and expiry. Malformed and expired tokens both come back
/// as `TokenInvalid`; the caller decides whether that means anonymous or 401.
pub fn verify(secret: &str, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::TokenInvalid)
}
