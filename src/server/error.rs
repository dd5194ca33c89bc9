use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::llm::DescribeError;
use crate::report::ControllerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unknown report session {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("{0}")]
    BadRequest(String),
    #[error("Could not read upload: {0}")]
    Upload(#[from] MultipartError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Describe(#[from] DescribeError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(err) => err.status(),
            ApiError::Controller(err) => match err {
                ControllerError::InvalidFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ControllerError::Unavailable { .. } | ControllerError::InFlight { .. } => {
                    StatusCode::CONFLICT
                }
                ControllerError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            },
            ApiError::Describe(err) => match err {
                DescribeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                DescribeError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                DescribeError::Request(_)
                | DescribeError::Provider { .. }
                | DescribeError::MalformedResponse(_)
                | DescribeError::EmptyResult => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, self);
        }

        let mut body = json!({ "error": self.to_string() });
        if let ApiError::Controller(err) = &self {
            if let Some(notice) = err.notice() {
                body["notice"] = json!(notice);
            }
            if let ControllerError::Invalid(errors) = err {
                body["fieldErrors"] = json!(errors);
            }
        }
        (status, Json(body)).into_response()
    }
}
