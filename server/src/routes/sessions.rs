//! `POST/GET /sessions`, `DELETE /sessions/{thread_id}` (§6, §4.6).

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use backend_common::AppResult;
use backend_protocol::ThreadId;
use serde::Deserialize;
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{thread_id}", delete(destroy_session))
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    thread_id: String,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<CreateSessionResponse>> {
    let thread = state.sessions.create(user).await?;
    Ok(Json(CreateSessionResponse {
        thread_id: thread.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Serialize)]
struct ListSessionsResponse {
    threads: Vec<backend_agent::ThreadSummary>,
    total: u64,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListSessionsResponse>> {
    let (threads, total) = state.sessions.list(user, query.page, query.page_size).await?;
    Ok(Json(ListSessionsResponse { threads, total }))
}

async fn destroy_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<String>,
) -> AppResult<()> {
    state.sessions.destroy(&ThreadId(thread_id), user).await
}
