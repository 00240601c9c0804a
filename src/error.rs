use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

/// One offending field of a rejected request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("File size exceeds the limit")]
    FileTooLarge,
    #[error("Too many files uploaded")]
    TooManyFiles,
    #[error("Unexpected file field")]
    UnexpectedField,
    #[error("Missing receipt file")]
    MissingFile,
    #[error("Invalid file type. Only JPEG and PNG images are allowed")]
    InvalidFileType,
}

/// Every failure a request can end in. Handlers propagate it with `?`; the
/// `IntoResponse` impl is the single place errors become HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Upload(UploadError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<UploadError> for AppError {
    fn from(value: UploadError) -> Self {
        Self::Upload(value)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "Validation error",
                    "errors": errors,
                    "errorCode": "VALIDATION_ERROR",
                }),
            ),
            AppError::Upload(err) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": err.to_string(),
                    "errorCode": "FILE_UPLOAD_ERROR",
                }),
            ),
            AppError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({ "message": message, "errorCode": "RESOURCE_NOT_FOUND" }),
            ),
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "message": message, "errorCode": "VALIDATION_ERROR" }),
            ),
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": message, "errorCode": "ACCESS_UNAUTHORIZED" }),
            ),
            AppError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Something went wrong", "error": err.to_string() }),
                )
            }
            AppError::Internal(message) => {
                tracing::error!("internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Something went wrong", "error": message }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
