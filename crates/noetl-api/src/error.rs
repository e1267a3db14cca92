// HTTP error mapping. `noetl-core::CoreError` carries the domain
// taxonomy (spec.md §7); this translates it to a status code plus the
// `ApiErrorResponse` body every handler returns on failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use noetl_contracts::rest::ApiErrorResponse;
use noetl_core::error::CoreError;

pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CatalogUnresolved(msg) => ApiError::NotFound(msg),
            CoreError::Template(msg) | CoreError::TemplateUnresolved(msg) | CoreError::Condition(msg) => {
                ApiError::Validation(msg)
            }
            CoreError::LeaseExpired(id) => ApiError::Conflict(format!("lease expired for queue item {id}")),
            CoreError::Queue(msg)
            | CoreError::EventStore(msg)
            | CoreError::Keychain(msg)
            | CoreError::ResultStore(msg)
            | CoreError::ToolAdapter(msg) => ApiError::Internal(msg),
            CoreError::Internal(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "validation", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "request failed");
        }
        (status, Json(ApiErrorResponse { error: message, code: Some(code.to_string()) })).into_response()
    }
}
