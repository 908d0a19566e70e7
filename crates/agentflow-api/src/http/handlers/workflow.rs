//! Workflow definition handlers for the REST API.
//!
//! CRUD over versioned definitions plus the lifecycle actions. Bodies are
//! taken as raw JSON and decoded here so that a malformed document is
//! reported as a validation failure in the envelope, like any other
//! definition problem.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentflow_core::error::{ValidationError, Violation};
use agentflow_core::workflow::compile;
use agentflow_types::workflow::{WorkflowDefinition, WorkflowSummary};

use crate::http::error::AppError;
use crate::http::extractors::query::{VersionQuery, WorkflowListQuery, optional_json};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Decode a definition body, reporting decode failures as a violation.
fn parse_definition(body: serde_json::Value) -> Result<WorkflowDefinition, AppError> {
    serde_json::from_value(body)
        .map_err(|e| ValidationError::single("$", format!("parse error: {e}")).into())
}

fn workflow_link(id: Uuid) -> String {
    format!("/api/v1/workflows/{id}")
}

/// GET /api/v1/workflows - List the latest version of every workflow.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let start = Instant::now();

    let defs = state.workflows.list(query.status()?).await?;
    let summaries = defs.iter().map(WorkflowSummary::from).collect();

    Ok(Json(
        ApiResponse::success(summaries, start).with_link("self", "/api/v1/workflows"),
    ))
}

/// POST /api/v1/workflows - Create a draft workflow.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();

    let def = state.workflows.create(parse_definition(body)?).await?;
    let link = workflow_link(def.id);

    Ok(Json(ApiResponse::success(def, start).with_link("self", &link)))
}

/// Result of a dry-run validation.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminals: Option<Vec<String>>,
}

/// POST /api/v1/workflows/validate - Validate a definition without storing it.
///
/// Always answers 200; the report says whether the definition is valid.
pub async fn validate_workflow(
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ApiResponse<ValidationReport>>, AppError> {
    let start = Instant::now();

    let compiled = serde_json::from_value::<WorkflowDefinition>(body)
        .map_err(|e| ValidationError::single("$", format!("parse error: {e}")))
        .and_then(|def| compile(&def));

    let report = match compiled {
        Ok(compiled) => ValidationReport {
            valid: true,
            violations: Vec::new(),
            entry: Some(compiled.entry().to_string()),
            terminals: Some(compiled.terminals().to_vec()),
        },
        Err(e) => ValidationReport {
            valid: false,
            violations: e.violations,
            entry: None,
            terminals: None,
        },
    };

    Ok(Json(ApiResponse::success(report, start)))
}

/// GET /api/v1/workflows/{id} - Latest version, or `?version=N`.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();

    let def = state.workflows.get(id, query.version).await?;

    Ok(Json(
        ApiResponse::success(def, start)
            .with_link("self", &workflow_link(id))
            .with_link("executions", &format!("/api/v1/executions?workflow_id={id}")),
    ))
}

/// PUT /api/v1/workflows/{id} - Publish a new version as a draft.
pub async fn publish_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();

    let def = state
        .workflows
        .publish_version(id, parse_definition(body)?)
        .await?;

    Ok(Json(
        ApiResponse::success(def, start).with_link("self", &workflow_link(id)),
    ))
}

/// DELETE /api/v1/workflows/{id} - Delete every version.
///
/// Refused with 409 while unfinished executions reference the workflow.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    state.workflows.delete(id).await?;

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id }),
        start,
    )))
}

/// POST /api/v1/workflows/{id}/activate
pub async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.workflows.activate(id).await?;
    Ok(Json(ApiResponse::success(def, start)))
}

/// POST /api/v1/workflows/{id}/pause
pub async fn pause_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.workflows.pause(id).await?;
    Ok(Json(ApiResponse::success(def, start)))
}

/// POST /api/v1/workflows/{id}/archive
pub async fn archive_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.workflows.archive(id).await?;
    Ok(Json(ApiResponse::success(def, start)))
}

#[derive(Debug, Default, Deserialize)]
pub struct DuplicateRequest {
    pub name: Option<String>,
}

/// POST /api/v1/workflows/{id}/duplicate - Copy the latest version as a new draft.
///
/// Optional body: `{ "name": "..." }`.
pub async fn duplicate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();

    let request: DuplicateRequest = optional_json(&body)?;
    let def = state.workflows.duplicate(id, request.name).await?;
    let link = workflow_link(def.id);

    Ok(Json(ApiResponse::success(def, start).with_link("self", &link)))
}
