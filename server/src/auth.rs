//! Bearer-JWT authentication and Argon2 password hashing (§4.2, §6).
//!
//! Grounded on `original_source/src/auth.py`/`api/auth.py`: a single HS256
//! token whose `sub` claim is the user id, checked against `Bearer `
//! headers by two extractors — [`CurrentUser`] for any authenticated
//! route, [`AdminUser`] for the `/admin/*` routes, which additionally
//! re-reads the user row so a demoted admin loses access on their very
//! next request rather than whenever their token happens to expire.

use std::sync::Arc;

use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordHasher;
use argon2::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use backend_common::AppError;
use backend_protocol::UserId;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Issues an access token valid for `expire_hours` hours from now.
pub fn issue_token(user: UserId, secret: &str, expire_hours: u64) -> Result<String, AppError> {
    let exp = chrono::Utc::now() + chrono::Duration::hours(expire_hours as i64);
    let claims = Claims {
        sub: user.to_string(),
        exp: exp.timestamp() as usize,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token signing failed: {e}")))
}

fn decode_bearer(parts: &Parts, secret: &str) -> Result<UserId, AppError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization header is not a bearer token".to_string()))?;
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;
    data.claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("token subject is not a valid user id".to_string()))
}

/// Any authenticated caller (§6: every route but `/auth/*` requires this).
pub struct CurrentUser(pub UserId);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        decode_bearer(parts, &state.config.jwt_secret).map(CurrentUser)
    }
}

/// An authenticated caller whose user row has `is_admin = true` right now
/// (§6: every `/admin/*` route).
pub struct AdminUser(pub UserId);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user_id = decode_bearer(parts, &state.config.jwt_secret)?;
        let user = state
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("token subject no longer exists".to_string()))?;
        if !user.is_admin {
            return Err(AppError::Forbidden("admin privileges required".to_string()));
        }
        Ok(AdminUser(user_id))
    }
}
