//! Error types for svbatch-server

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use svbatch_core::Error as CoreError;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body missing, not JSON, or the wrong shape (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Engine rejected the call
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Core(err) => match err {
                CoreError::EmptyBatch
                | CoreError::DuplicateUnit(_)
                | CoreError::InvalidUnit { .. }
                | CoreError::InvalidBatch(_) => (StatusCode::BAD_REQUEST, "INVALID_BATCH"),
                CoreError::UnsupportedFormat(_) | CoreError::UnsupportedMiddleware(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_PLUGIN")
                }
                CoreError::InvalidOptions { .. } => (StatusCode::BAD_REQUEST, "INVALID_OPTIONS"),
                CoreError::UnknownBatch(_) | CoreError::UnknownUnit(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                CoreError::UnitNotReady { .. } => (StatusCode::CONFLICT, "UNIT_NOT_READY"),
                CoreError::UnitBusy(_) => (StatusCode::CONFLICT, "UNIT_BUSY"),
                CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
                CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the API error body
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}
