//! `POST /auth/register`, `POST /auth/login` (§6).

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use backend_common::AppError;
use backend_common::AppResult;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;

use crate::auth::hash_password;
use crate::auth::issue_token;
use crate::auth::verify_password;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    message: String,
    user_id: String,
}

/// Creates the account and its `{workspace_root}/{user_id}` working tree.
/// Mirrors `api/auth.py`'s `/register`.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest("username and password are required".to_string()));
    }
    let hash = hash_password(&body.password)?;
    let user = state.users.create(&body.username, &hash, false).await?;
    fs::create_dir_all(state.config.user_workspace(&user.user_id.to_string())).await?;
    Ok(Json(RegisterResponse {
        message: "registered".to_string(),
        user_id: user.user_id.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: &'static str,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = state
        .users
        .get_by_username(&body.username)
        .await?
        .filter(|u| verify_password(&body.password, &u.password_hash))
        .ok_or_else(|| AppError::Unauthorized("invalid username or password".to_string()))?;
    let token = issue_token(user.user_id, &state.config.jwt_secret, state.config.access_token_expire_hours)?;
    Ok(Json(LoginResponse {
        access_token: token,
        token_type: "bearer",
    }))
}
