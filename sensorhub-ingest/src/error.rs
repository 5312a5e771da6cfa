//! HTTP error mapping
//!
//! Every handler returns [`ApiResult`]; library errors are translated to a
//! status code plus a JSON body `{ "error", "code", "violations"? }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sensorhub_common::Error;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request header or parameter (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Caller role may not perform this operation (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Common(#[from] Error),
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Common(err) => match err {
                Error::TenantRequired => (StatusCode::UNAUTHORIZED, "TENANT_REQUIRED"),
                Error::ValidationFailed { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
                Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                Error::InvalidThresholdRange(_) => (StatusCode::BAD_REQUEST, "INVALID_THRESHOLD_RANGE"),
                Error::SchemaNotFound(_) => (StatusCode::NOT_FOUND, "SCHEMA_NOT_FOUND"),
                Error::NotFoundOrAccessDenied(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                Error::DuplicateThreshold(_) => (StatusCode::CONFLICT, "DUPLICATE_THRESHOLD"),
                Error::MigrationConflict(_) => (StatusCode::CONFLICT, "MIGRATION_CONFLICT"),
                Error::DeadlineExceeded(_) => (StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED"),
                Error::Database(_)
                | Error::Io(_)
                | Error::Json(_)
                | Error::Config(_)
                | Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(code, "Request failed: {}", self);
        }

        let body = match &self {
            ApiError::Common(Error::ValidationFailed { violations }) => json!({
                "error": self.to_string(),
                "code": code,
                "violations": violations,
            }),
            _ => json!({
                "error": self.to_string(),
                "code": code,
            }),
        };

        (status, Json(body)).into_response()
    }
}
