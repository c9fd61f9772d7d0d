//! API error responses.
//!
//! Errors are rendered as problem-details bodies with a stable `code` so
//! callers can branch without parsing the human-readable detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use corral_ledger::ValidationError;
use serde::Serialize;

use crate::worker::WorkerError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub retryable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: ProblemDetails,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            status,
            problem: ProblemDetails {
                r#type: format!("https://corral.dev/problems/{code}"),
                title,
                status: status.as_u16(),
                detail: detail.into(),
                code,
                retryable: false,
            },
        }
    }

    fn retryable(mut self) -> Self {
        self.problem.retryable = true;
        self
    }

    pub fn bad_request(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, detail)
    }

    pub fn not_found(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.problem)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::bad_request("validation_failed", e.to_string())
    }
}

impl From<WorkerError> for ApiError {
    fn from(e: WorkerError) -> Self {
        let detail = e.to_string();
        match e {
            WorkerError::NotFound(_) => ApiError::not_found("worker_not_found", detail),
            // Never retryable, never overridable.
            WorkerError::SafetyViolation { .. } => {
                ApiError::new(StatusCode::FORBIDDEN, "safety_violation", detail)
            }
            WorkerError::NotDrained(_) => {
                ApiError::new(StatusCode::CONFLICT, "worker_not_drained", detail)
            }
            WorkerError::Validation(_) => ApiError::bad_request("validation_failed", detail),
            WorkerError::Timeout { .. } => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, "drain_timeout", detail).retryable()
            }
            WorkerError::Cluster(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "cluster_error", detail).retryable()
            }
            WorkerError::Provisioning(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "provisioning_error", detail).retryable()
            }
        }
    }
}
