use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected by access policy: {0}")]
    PolicyRejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let field = match &self {
            AppError::Validation { field, .. } => Some(*field),
            _ => None,
        };

        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::PolicyRejected(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = match field {
            Some(field) => Json(json!({ "error": message, "field": field })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => tonic::Status::not_found(msg),
            AppError::BadRequest(msg) => tonic::Status::invalid_argument(msg),
            AppError::Validation { field, message } => {
                tonic::Status::invalid_argument(format!("{field}: {message}"))
            }
            AppError::Conflict(msg) => tonic::Status::already_exists(msg),
            AppError::PolicyRejected(msg) => tonic::Status::permission_denied(msg),
            AppError::Unavailable(msg) => tonic::Status::unavailable(msg),
            AppError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

impl From<tonic::Status> for AppError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::NotFound => AppError::NotFound(message),
            tonic::Code::InvalidArgument => AppError::BadRequest(message),
            tonic::Code::AlreadyExists => AppError::Conflict(message),
            tonic::Code::PermissionDenied => AppError::PolicyRejected(message),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                AppError::Unavailable(message)
            }
            _ => AppError::Internal(message),
        }
    }
}

impl From<tonic::transport::Error> for AppError {
    fn from(err: tonic::transport::Error) -> Self {
        AppError::Unavailable(format!("transport error: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Unavailable(format!("http error: {err}"))
    }
}
