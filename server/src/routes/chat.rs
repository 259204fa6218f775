//! `POST /chat/{thread_id}`, `POST /resume/{thread_id}`,
//! `GET /status/{thread_id}`, `GET /history/{thread_id}` (§6, §4.3-§4.6).
//!
//! The chat/resume handlers stream pre-formatted SSE frames straight
//! from [`backend_agent::StreamMultiplexer::multiplex`] as the response
//! body, rather than axum's typed `Sse` wrapper, since each
//! `InternalEvent::to_sse_frame` is already a complete `event:`/`data:`
//! frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use backend_agent::HistoryMessage;
use backend_agent::Mode;
use backend_agent::ThreadStatusView;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::InterruptAction;
use backend_protocol::ThreadId;
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/{thread_id}", post(chat))
        .route("/resume/{thread_id}", post(resume))
        .route("/status/{thread_id}", get(status))
        .route("/history/{thread_id}", get(history))
}

fn sse_response(rx: tokio_stream::wrappers::ReceiverStream<String>) -> Response {
    let body = Body::from_stream(rx.map(|frame| Ok::<_, Infallible>(frame)));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn authorize(thread: &ThreadId, user: backend_protocol::UserId) -> AppResult<()> {
    if thread.is_owned_by(user) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("thread {thread} is not owned by the calling user")))
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    attached_files: Vec<String>,
    #[serde(default)]
    mode: Mode,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> AppResult<Response> {
    let thread = ThreadId(thread_id);
    authorize(&thread, user)?;
    let events = state
        .runner
        .run_turn(thread.clone(), body.message.clone(), body.attached_files, body.mode);
    let frames = state.stream_mux.multiplex(thread, body.message, events);
    Ok(sse_response(frames))
}

#[derive(Debug, Deserialize)]
struct ResumeRequest {
    action: InterruptAction,
    #[serde(default)]
    answers: Vec<String>,
    #[serde(default)]
    mode: Mode,
}

async fn resume(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<String>,
    Json(body): Json<ResumeRequest>,
) -> AppResult<Response> {
    let thread = ThreadId(thread_id);
    authorize(&thread, user)?;
    let events = state
        .interrupts
        .resume(thread.clone(), body.action, body.answers, body.mode)
        .await;
    let frames = state.stream_mux.multiplex(thread, String::new(), events);
    Ok(sse_response(frames))
}

async fn status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<String>,
) -> AppResult<Json<ThreadStatusView>> {
    let thread = ThreadId(thread_id);
    Ok(Json(state.sessions.get_status(&thread, user).await?))
}

async fn history(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(thread_id): Path<String>,
) -> AppResult<Json<Vec<HistoryMessage>>> {
    let thread = ThreadId(thread_id);
    Ok(Json(state.sessions.get_history(&thread, user).await?))
}
