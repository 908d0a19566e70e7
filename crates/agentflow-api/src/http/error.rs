//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use agentflow_core::error::{EngineError, ValidationError};
use agentflow_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Malformed request (bad JSON, bad query parameter).
    BadRequest(String),
    /// Definition rejected; every violation goes into `details`.
    Validation(ValidationError),
    /// Well-formed request whose payload breaks a declared schema.
    Unprocessable(String),
    NotFound(String),
    /// Duplicate or stale request, or a disallowed lifecycle transition.
    Conflict(String),
    /// The durable store could not be reached.
    Unavailable(String),
    /// A model provider failed while serving the request.
    Upstream(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(v) => AppError::Validation(v),
            EngineError::WorkflowNotFound(_)
            | EngineError::ExecutionNotFound(_)
            | EngineError::InteractionNotFound(_)
            | EngineError::AgentNotFound(_) => AppError::NotFound(e.to_string()),
            EngineError::InvalidResponse { .. } => AppError::Unprocessable(e.to_string()),
            EngineError::Conflict(_)
            | EngineError::WorkflowNotActive { .. }
            | EngineError::InvalidWorkflowTransition { .. }
            | EngineError::WorkflowInUse { .. }
            | EngineError::AgentInUse { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::ExecutionBusy(_) => AppError::Conflict(e.to_string()),
            EngineError::StoreUnavailable(_) => AppError::Unavailable(e.to_string()),
            EngineError::Repository(RepositoryError::NotFound) => {
                AppError::NotFound(e.to_string())
            }
            EngineError::Repository(RepositoryError::Conflict(_)) => {
                AppError::Conflict(e.to_string())
            }
            EngineError::Repository(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                format!("request has {} violation(s)", e.violations.len()),
            ),
            AppError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE", msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", msg.clone())
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let AppError::Validation(ref e) = self {
            error["details"] = json!(e.violations);
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [error]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::error::{InteractionConflictError, StoreUnavailableError, Violation};
    use agentflow_types::execution::ExecutionStatus;
    use uuid::Uuid;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let id = Uuid::now_v7();
        assert_eq!(status_of(EngineError::ExecutionNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::WorkflowNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(EngineError::Conflict(InteractionConflictError::AlreadyPending(id))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EngineError::InvalidTransition {
                id,
                from: ExecutionStatus::Completed,
                to: ExecutionStatus::Cancelled,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(EngineError::ExecutionBusy(id)), StatusCode::CONFLICT);
        assert_eq!(status_of(EngineError::AgentNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(EngineError::AgentInUse { id, workflow_id: id }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EngineError::InvalidResponse {
                interaction_id: id,
                reason: "\"decision\" is a required property".into(),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(EngineError::StoreUnavailable(StoreUnavailableError("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(EngineError::Repository(RepositoryError::NotFound)),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_validation_maps_to_422() {
        let err = ValidationError {
            violations: vec![
                Violation::new("name", "must not be empty"),
                Violation::new("edges[0]", "target 'ghost' does not exist"),
            ],
        };
        assert_eq!(status_of(err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_plain_variants() {
        assert_eq!(status_of(AppError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AppError::Upstream("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_of(AppError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
