// Error types for the API server and their JSON bodies

use crate::queue::SubmitError;
use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;

pub const BUSY_MESSAGE: &str =
    "The service is busy. Please wait for the current processing to finish.";

/// API server error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    InternalServerError(String),

    // Application-specific errors
    Busy {
        last_processing_time: Option<Duration>,
    },
    ProcessingFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // Busy is an expected answer, not a failure, and has its own shape.
            Self::Busy {
                last_processing_time,
            } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = Json(json!({
                    "status": status.as_u16(),
                    "message": BUSY_MESSAGE,
                    "lastProcessingTime": last_processing_time.map(|d| d.as_millis() as u64),
                }));
                return (status, body).into_response();
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            Self::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::ProcessingFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let message = if status.is_server_error() {
            "Internal server error"
        } else {
            "Bad request"
        };

        let body = Json(json!({
            "status": status.as_u16(),
            "message": message,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::Busy {
                last_processing_time,
            } => Self::Busy {
                last_processing_time,
            },
            SubmitError::Failed(err) => Self::ProcessingFailed(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName(name) => {
                Self::BadRequest(format!("Invalid file name: {}", name))
            }
            StorageError::Io(err) => {
                Self::InternalServerError(format!("Failed to access processed image: {}", err))
            }
        }
    }
}
