//! API error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cronhands_core::ManagerError;
use thiserror::Error;
use tracing::error;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No job with this name.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Rendering the state snapshot failed.
    #[error("render failed: {0}")]
    Render(String),

    /// Binding or serving failed.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    /// Manager rejected the request.
    #[error(transparent)]
    Manager(ManagerError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Render(_) | ApiError::Io(_) | ApiError::Manager(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::NotFound(name) => ApiError::NotFound(name),
            other => ApiError::Manager(other),
        }
    }
}

impl From<minijinja::Error> for ApiError {
    fn from(err: minijinja::Error) -> Self {
        ApiError::Render(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Render(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
