use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;

/// Error type shared by every crate that sits behind the HTTP surface.
///
/// Each variant knows its own status code, so a handler can propagate
/// with `?` and the server always answers with the right response
/// instead of a blanket 500.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The verb is understood but cannot apply to the resource's current
    /// state (e.g. MKCOL on a path that already exists).
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The requested transition is illegal given the resource's current
    /// state (e.g. approving a skill still in `layer1`).
    #[error("illegal state transition: {0}")]
    StateIllegal(String),

    /// A sandbox operation exceeded its deadline.
    #[error("sandbox operation timed out: {0}")]
    SandboxTimeout(String),

    /// A sandbox could not be created or recreated after the underlying
    /// backend persistently failed (§4.1, §7).
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// A skill was found `validating` at startup with no corresponding
    /// checkpoint to resume from (§4.7, §7).
    #[error("checkpoint lost for {0}")]
    CheckpointLost(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::StateIllegal(_) => StatusCode::BAD_REQUEST,
            AppError::SandboxTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::SandboxUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CheckpointLost(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
