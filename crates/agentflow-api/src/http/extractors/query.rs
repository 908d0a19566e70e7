//! Query parameters for list endpoints, and optional JSON bodies.

use axum::body::Bytes;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use agentflow_types::execution::{ExecutionFilter, ExecutionStatus};
use agentflow_types::workflow::WorkflowStatus;

use crate::http::error::AppError;

/// Query parameters for the workflow list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct WorkflowListQuery {
    /// Filter by status (draft, active, paused, archived).
    pub status: Option<String>,
}

impl WorkflowListQuery {
    pub fn status(&self) -> Result<Option<WorkflowStatus>, AppError> {
        parse_opt(self.status.as_deref(), "status")
    }
}

/// Query parameters for `GET /workflows/{id}`.
#[derive(Debug, Deserialize, Default)]
pub struct VersionQuery {
    /// Specific version; latest when omitted.
    pub version: Option<u32>,
}

/// Query parameters for the execution list endpoint.
#[derive(Debug, Deserialize)]
pub struct ExecutionListQuery {
    pub workflow_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// Upper bound on a single page.
const MAX_LIMIT: u32 = 1000;

impl ExecutionListQuery {
    pub fn filter(&self) -> Result<ExecutionFilter, AppError> {
        Ok(ExecutionFilter {
            workflow_id: self.workflow_id,
            status: parse_opt::<ExecutionStatus>(self.status.as_deref(), "status")?,
            skip: self.skip,
            limit: self.limit.clamp(1, MAX_LIMIT),
        })
    }
}

fn parse_opt<T>(value: Option<&str>, field: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| AppError::BadRequest(format!("invalid {field}: {e}")))
        })
        .transpose()
}

/// Decode an optional JSON body: an empty body yields `T::default()`.
pub fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
}
