//! Execution and interaction handlers for the REST API.
//!
//! `start` and `respond` return as soon as the execution is running; the
//! drive continues on a background task and its progress is visible through
//! `GET /executions/{id}` and the event stream.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use agentflow_types::execution::{Execution, ExecutionHistory, ExecutionState, Interaction};

use crate::http::error::AppError;
use crate::http::extractors::query::{ExecutionListQuery, optional_json};
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn execution_link(id: Uuid) -> String {
    format!("/api/v1/executions/{id}")
}

/// Body of `POST /executions`.
#[derive(Debug, Deserialize)]
pub struct CreateExecutionRequest {
    pub workflow_id: Uuid,
    /// Pin a definition version; latest when omitted.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub input: ExecutionState,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Start right away (in the background).
    #[serde(default)]
    pub start: bool,
}

/// GET /api/v1/executions - List executions, newest first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionListQuery>,
) -> Result<Json<ApiResponse<Vec<Execution>>>, AppError> {
    let start = Instant::now();

    let executions = state.engine.list_executions(&query.filter()?).await?;

    Ok(Json(
        ApiResponse::success(executions, start).with_link("self", "/api/v1/executions"),
    ))
}

/// POST /api/v1/executions - Create a pending execution.
pub async fn create_execution(
    State(state): State<AppState>,
    Json(body): Json<CreateExecutionRequest>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();

    let mut execution = state
        .engine
        .create_execution(body.workflow_id, body.version, body.input, body.created_by)
        .await?;
    if body.start {
        execution = state.engine.spawn_start(execution.id).await?;
    }
    let link = execution_link(execution.id);

    Ok(Json(ApiResponse::success(execution, start).with_link("self", &link)))
}

/// GET /api/v1/executions/{id} - Status and state.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();

    let execution = state.engine.get_execution(id).await?;

    Ok(Json(
        ApiResponse::success(execution, start)
            .with_link("self", &execution_link(id))
            .with_link("history", &format!("{}/history", execution_link(id))),
    ))
}

/// POST /api/v1/executions/{id}/start - Start a pending execution.
pub async fn start_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();

    let execution = state.engine.spawn_start(id).await?;

    Ok(Json(
        ApiResponse::success(execution, start).with_link("self", &execution_link(id)),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/executions/{id}/cancel - Cancel a running or paused execution.
///
/// Optional body: `{ "reason": "..." }`.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();

    let request: CancelRequest = optional_json(&body)?;
    let reason = request
        .reason
        .unwrap_or_else(|| "cancelled by user".to_string());
    let execution = state.engine.cancel_execution(id, &reason).await?;

    Ok(Json(ApiResponse::success(execution, start)))
}

/// GET /api/v1/executions/{id}/history - Checkpoints, node runs and interactions.
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionHistory>>, AppError> {
    let start = Instant::now();

    let history = state.engine.history(id).await?;

    Ok(Json(ApiResponse::success(history, start)))
}

/// GET /api/v1/executions/{id}/interactions - Pending interactions of one execution.
pub async fn list_interactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Interaction>>>, AppError> {
    let start = Instant::now();

    let interactions = state.engine.list_pending_interactions(Some(id)).await?;

    Ok(Json(ApiResponse::success(interactions, start)))
}

/// Body of the respond endpoint.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// Payload merged into state under the paused node's id.
    pub response: serde_json::Value,
}

/// POST /api/v1/executions/{id}/interactions/{iid}/respond - Answer and resume.
///
/// A duplicate or stale response is a 409 and leaves the execution untouched.
pub async fn respond_interaction(
    State(state): State<AppState>,
    Path((id, interaction_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();

    let execution = state
        .engine
        .spawn_respond(id, interaction_id, body.response)
        .await?;

    Ok(Json(
        ApiResponse::success(execution, start).with_link("self", &execution_link(id)),
    ))
}

/// GET /api/v1/interactions/pending - Pending interactions across executions.
pub async fn list_pending_interactions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Interaction>>>, AppError> {
    let start = Instant::now();

    let interactions = state.engine.list_pending_interactions(None).await?;

    Ok(Json(ApiResponse::success(interactions, start)))
}
