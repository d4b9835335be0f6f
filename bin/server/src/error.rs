//! HTTP-facing error taxonomy.
//!
//! Every error surfaced to an API caller maps to exactly one of these
//! variants, each produced by exactly one layer (validator, gateway,
//! safety envelope, scheduler). `ApiError` carries a machine-readable
//! code alongside the human message so client tooling never has to
//! string-match.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use loomwright_safety::SafetyError;
use loomwright_workflow::{ApprovalError, GatewayError, SchedulerError};
use serde::Serialize;
use serde_json::json;

/// The error type returned by every HTTP handler.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Malformed input, missing field, invalid enum. Never reaches persistence.
    BadRequest(String),
    /// Referenced entity absent.
    NotFound(String),
    /// Duplicate unique key, or a guarded transition found no matching row.
    Conflict(String),
    /// Caller exceeded its rate limit.
    RateLimited { retry_after_secs: u64 },
    /// Internal fault; a correlation id is also present in logs.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(m) | Self::Conflict(m) | Self::Internal(m) | Self::NotFound(m) => m.clone(),
            Self::RateLimited { retry_after_secs } => format!("rate limited, retry after {retry_after_secs}s"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self.message(), "internal error");
        }
        let body = ErrorBody { code: self.code(), message: self.message() };
        (self.status(), Json(json!(body))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::RunNotFound { .. } | GatewayError::ApprovalNotFound { .. } => Self::NotFound(e.to_string()),
            GatewayError::StorageFailed { .. } => Self::Internal(e.to_string()),
            GatewayError::StateConflict { .. } => Self::Conflict(e.to_string()),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        Self::Conflict(e.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::AlreadyClaimed { .. } => Self::Conflict(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<SafetyError> for ApiError {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::RateLimited { retry_after } => Self::RateLimited { retry_after_secs: retry_after.as_secs() },
            SafetyError::CircuitOpen => Self::Internal("container runtime is unavailable".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        assert_eq!(ApiError::BadRequest("missing field".to_string()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        assert_eq!(ApiError::RateLimited { retry_after_secs: 5 }.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn gateway_not_found_maps_to_api_not_found() {
        let err: ApiError = GatewayError::RunNotFound { run_id: loomwright_core::WorkflowRunId::new() }.into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn gateway_state_conflict_maps_to_api_conflict() {
        let err: ApiError = GatewayError::StateConflict {
            run_id: loomwright_core::WorkflowRunId::new(),
            expected: loomwright_workflow::RunStatus::Pending,
            actual: loomwright_workflow::RunStatus::Running,
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn scheduler_already_claimed_maps_to_api_conflict() {
        let err: ApiError = SchedulerError::AlreadyClaimed { run_id: loomwright_core::WorkflowRunId::new() }.into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
