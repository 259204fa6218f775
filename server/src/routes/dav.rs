//! `/dav/{path:.*}` (§6, §4.9): PROPFIND/GET/PUT/MKCOL/DELETE/MOVE against
//! the calling user's WebDAV root.
//!
//! `axum::routing::MethodFilter` has no slots for the WebDAV-only verbs
//! (`PROPFIND`, `MKCOL`, `MOVE`), so this mounts one `any()` handler and
//! dispatches on [`Method`] itself, the way a raw `hyper`/`tower` service
//! would.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::any;
use backend_common::AppError;
use backend_common::AppResult;
use backend_webdav::Depth;

use crate::auth::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/dav/{*path}", any(dispatch))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    method: Method,
    headers: HeaderMap,
    Path(path): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    let user_id = user.to_string();
    match method.as_str() {
        "PROPFIND" => {
            let depth = match headers.get("Depth").and_then(|v| v.to_str().ok()) {
                Some("0") => Depth::Zero,
                _ => Depth::One,
            };
            let xml = state.dav.propfind(&user_id, &path, depth).await?;
            Ok(Response::builder()
                .status(207)
                .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(xml.into())
                .map_err(|e| AppError::Internal(e.into()))?)
        }
        "GET" => {
            let (bytes, filename) = state.dav.get(&user_id, &path).await?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                )
                .body(bytes.into())
                .map_err(|e| AppError::Internal(e.into()))?)
        }
        "PUT" => {
            let if_match = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok());
            let outcome = state.dav.put(&user_id, &path, &body, if_match).await?;
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header(header::ETAG, outcome.etag)
                .body(Vec::new().into())
                .map_err(|e| AppError::Internal(e.into()))?)
        }
        "MKCOL" => {
            state.dav.mkcol(&user_id, &path).await?;
            Ok(StatusCode::CREATED.into_response())
        }
        "DELETE" => {
            state.dav.delete(&user_id, &path).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        "MOVE" => {
            let dest = headers
                .get("Destination")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AppError::BadRequest("missing Destination header".to_string()))?;
            state.dav.mv(&user_id, &path, dest).await?;
            Ok(StatusCode::CREATED.into_response())
        }
        other => Err(AppError::MethodNotAllowed(format!("unsupported WebDAV method: {other}"))),
    }
}
