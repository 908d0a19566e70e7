//! Agent profile handlers for the REST API.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use agentflow_types::agent::{Agent, AgentSpec, AgentTestResult};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn agent_link(id: Uuid) -> String {
    format!("/api/v1/agents/{id}")
}

/// GET /api/v1/agents - Every agent, by name.
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Agent>>>, AppError> {
    let start = Instant::now();

    let agents = state.agents.list().await?;

    Ok(Json(
        ApiResponse::success(agents, start).with_link("self", "/api/v1/agents"),
    ))
}

/// POST /api/v1/agents
pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentSpec>,
) -> Result<Json<ApiResponse<Agent>>, AppError> {
    let start = Instant::now();

    let agent = state.agents.create(body).await?;
    let link = agent_link(agent.id);

    Ok(Json(ApiResponse::success(agent, start).with_link("self", &link)))
}

/// GET /api/v1/agents/{id}
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Agent>>, AppError> {
    let start = Instant::now();

    let agent = state.agents.get(id).await?;

    Ok(Json(
        ApiResponse::success(agent, start)
            .with_link("self", &agent_link(id))
            .with_link("test", &format!("{}/test", agent_link(id))),
    ))
}

/// PUT /api/v1/agents/{id} - Replace every editable field.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AgentSpec>,
) -> Result<Json<ApiResponse<Agent>>, AppError> {
    let start = Instant::now();

    let agent = state.agents.update(id, body).await?;

    Ok(Json(
        ApiResponse::success(agent, start).with_link("self", &agent_link(id)),
    ))
}

/// DELETE /api/v1/agents/{id} - Refused while an active workflow uses it.
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    state.agents.delete(id).await?;

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id }),
        start,
    )))
}

#[derive(Debug, Deserialize)]
pub struct TestAgentRequest {
    pub input: String,
}

/// POST /api/v1/agents/{id}/test - Run the agent once on `input`.
///
/// A model failure is reported in the body with `success: false`.
pub async fn test_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TestAgentRequest>,
) -> Result<Json<ApiResponse<AgentTestResult>>, AppError> {
    let start = Instant::now();

    let result = state.engine.test_agent(id, &body.input).await?;

    Ok(Json(ApiResponse::success(result, start)))
}
