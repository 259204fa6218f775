//! `POST /files/init-upload`, `/upload-chunk`, `/complete-upload`,
//! `DELETE /files/upload/{upload_id}`, `GET /files/upload/{upload_id}/progress`,
//! `POST /files/upload-simple` (§6, §4.8).

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::State;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use backend_common::AppError;
use backend_common::AppResult;
use backend_uploads::UploadProgress;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;

use crate::auth::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files/init-upload", post(init_upload))
        .route("/files/upload-chunk", post(upload_chunk))
        .route("/files/complete-upload", post(complete_upload))
        .route("/files/upload/{upload_id}", delete(cancel_upload))
        .route("/files/upload/{upload_id}/progress", get(progress))
        .route("/files/upload-simple", post(upload_simple))
}

#[derive(Debug, Deserialize)]
struct InitUploadRequest {
    filename: String,
    total_chunks: u32,
    total_size: u64,
    #[serde(default)]
    target_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitUploadResponse {
    upload_id: String,
}

async fn init_upload(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<InitUploadRequest>,
) -> AppResult<Json<InitUploadResponse>> {
    let upload_id = state
        .uploads
        .init(
            &user.to_string(),
            &body.filename,
            body.total_chunks,
            body.total_size,
            body.target_path.as_deref(),
        )
        .await?;
    Ok(Json(InitUploadResponse { upload_id }))
}

/// Multipart body: `upload_id` and `chunk_index` text fields, `chunk`
/// binary field.
async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<()> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut data = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadRequest(e.to_string()))? {
        match field.name() {
            Some("upload_id") => upload_id = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?),
            Some("chunk_index") => {
                let raw = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                chunk_index = Some(raw.parse::<i64>().map_err(|_| AppError::BadRequest("chunk_index must be an integer".to_string()))?);
            }
            Some("chunk") => data = Some(field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?),
            _ => {}
        }
    }
    let upload_id = upload_id.ok_or_else(|| AppError::BadRequest("missing upload_id field".to_string()))?;
    let chunk_index = chunk_index.ok_or_else(|| AppError::BadRequest("missing chunk_index field".to_string()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("missing chunk field".to_string()))?;
    state.uploads.save_chunk(&upload_id, chunk_index, &data).await
}

#[derive(Debug, Deserialize)]
struct CompleteUploadRequest {
    upload_id: String,
    target_path: String,
}

#[derive(Debug, Serialize)]
struct CompleteUploadResponse {
    path: String,
}

async fn complete_upload(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CompleteUploadRequest>,
) -> AppResult<Json<CompleteUploadResponse>> {
    let path = state
        .uploads
        .complete(&body.upload_id, &user.to_string(), &body.target_path)
        .await?;
    Ok(Json(CompleteUploadResponse {
        path: path.to_string_lossy().into_owned(),
    }))
}

async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(upload_id): Path<String>,
) -> AppResult<()> {
    state.uploads.cancel(&upload_id).await
}

async fn progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(upload_id): Path<String>,
) -> AppResult<Json<UploadProgress>> {
    Ok(Json(state.uploads.progress(&upload_id).await?))
}

#[derive(Debug, Serialize)]
struct UploadSimpleResponse {
    path: String,
}

/// Single-request upload for files small enough to not need chunking
/// (§4.8), capped at `simple_upload_max_bytes`.
async fn upload_simple(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Json<UploadSimpleResponse>> {
    let mut target_path = None;
    let mut data = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadRequest(e.to_string()))? {
        match field.name() {
            Some("target_path") => {
                target_path = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?)
            }
            Some("file") => data = Some(field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?),
            _ => {}
        }
    }
    let target_path = target_path.ok_or_else(|| AppError::BadRequest("missing target_path field".to_string()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("missing file field".to_string()))?;
    if data.len() as u64 > state.config.simple_upload_max_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "file exceeds {} bytes",
            state.config.simple_upload_max_bytes
        )));
    }

    let base = normalize(&state.config.user_workspace(&user.to_string()));
    let target = normalize(&base.join(target_path.trim_start_matches('/')));
    if !target.starts_with(&base) {
        return Err(AppError::BadRequest("invalid target path".to_string()));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&target, &data).await?;
    Ok(Json(UploadSimpleResponse {
        path: target.to_string_lossy().into_owned(),
    }))
}

/// Lexical `..`-collapsing normalization matching the one `backend_uploads`
/// and `backend_webdav` use for path-safety checks: the destination need
/// not exist yet, so `Path::canonicalize` is unusable here.
fn normalize(path: &std::path::Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
