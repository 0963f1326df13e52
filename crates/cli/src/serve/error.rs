//! Mapping of workflow errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use helpdesk_storage::StorageError;
use helpdesk_workflow::WorkflowError;

#[derive(Debug)]
pub(crate) enum ApiError {
    Workflow(WorkflowError),
    /// Missing or unknown `X-User-Id`.
    Unauthorized(String),
    /// Malformed body or query string.
    BadRequest(String),
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        ApiError::Workflow(e)
    }
}

pub(crate) fn status_for(e: &WorkflowError) -> StatusCode {
    match e {
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::InvalidTransition(_) | WorkflowError::Conflict { .. } => {
            StatusCode::CONFLICT
        }
        WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Storage(StorageError::AlreadyExists { .. }) => StatusCode::CONFLICT,
        // a rejected write the backend will reject again: a bug, not an outage
        WorkflowError::Storage(inner) if !inner.is_retryable() => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        WorkflowError::Directory(_) | WorkflowError::Storage(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Workflow(e) => {
                let mut body = serde_json::json!({
                    "error": e.to_string(),
                    "kind": e.kind(),
                });
                if e.is_retryable() {
                    body["retryable"] = serde_json::Value::Bool(true);
                }
                (status_for(&e), body)
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": msg, "kind": "unauthorized"}),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": msg, "kind": "bad_request"}),
            ),
        };
        (status, Json(body)).into_response()
    }
}
