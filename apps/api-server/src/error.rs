use crate::session::SessionError;
use ai::blip::ImageDecodeError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use report::ReportError;
use uuid::Uuid;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("no image uploaded yet")]
    NoImage,

    #[error("no answered question to report yet")]
    NoAnswer,

    #[error("missing multipart field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported file type: {0}, expected jpg, jpeg or png")]
    UnsupportedFileType(String),

    #[error(transparent)]
    InvalidImage(#[from] ImageDecodeError),

    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("model failed: {0:#}")]
    Model(anyhow::Error),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => ApiError::SessionNotFound(id),
            SessionError::NoImage => ApiError::NoImage,
            SessionError::NoAnswer => ApiError::NoAnswer,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", e))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NoImage | ApiError::NoAnswer => StatusCode::CONFLICT,
            ApiError::MissingField(_)
            | ApiError::UnsupportedFileType(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Model(_) | ApiError::Report(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
