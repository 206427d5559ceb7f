use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::policy::Denial;
use crate::schema::FieldErrors;
use crate::storage::StorageError;
use crate::store::StoreError;

/// Every handler failure, mapped onto an HTTP status and a JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    /// Rendered as `{"error": ...}`.
    #[error("{0}")]
    BadRequest(String),
    /// Rendered as `{"message": ...}`, used by account flows.
    #[error("{0}")]
    Rejected(String),
    #[error("Unsupported file type")]
    UnsupportedMedia,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Permission denied.")]
    Forbidden,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found() -> Self {
        ApiError::NotFound("Not found.".to_string())
    }

    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => (StatusCode::BAD_REQUEST, json!(errors)),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Rejected(message) => (StatusCode::BAD_REQUEST, json!({ "message": message })),
            ApiError::UnsupportedMedia => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Unsupported file type" }),
            ),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, json!({ "error": message })),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Permission denied." }),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => {
                ApiError::Validation(FieldErrors::single(&field, format!("A record with this {field} already exists.")))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Unauthenticated => ApiError::unauthenticated(),
            Denial::Forbidden => ApiError::Forbidden,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Empty => ApiError::BadRequest(err.to_string()),
            StorageError::UnsupportedType => ApiError::UnsupportedMedia,
            StorageError::Io(io) => ApiError::Internal(io.to_string()),
        }
    }
}
