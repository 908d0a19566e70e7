//! Tool catalog and model provider handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use agentflow_types::llm::{LlmError, ProviderKind, ProviderModels};
use agentflow_types::tool::ToolDescriptor;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/tools - Every registered tool, in name order.
pub async fn list_tools(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ToolDescriptor>>>, AppError> {
    let start = Instant::now();

    let tools = state.engine.tools().registry().descriptors();

    Ok(Json(
        ApiResponse::success(tools, start).with_link("self", "/api/v1/tools"),
    ))
}

/// GET /api/v1/tools/{name}
pub async fn get_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ToolDescriptor>>, AppError> {
    let start = Instant::now();

    let tool = state
        .engine
        .tools()
        .registry()
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("tool '{name}' not found")))?;

    Ok(Json(ApiResponse::success(tool.descriptor().clone(), start)))
}

/// GET /api/v1/tools/providers/{name}/models - Models a configured provider serves.
pub async fn list_provider_models(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ProviderModels>>, AppError> {
    let start = Instant::now();

    let kind: ProviderKind = name.parse().map_err(AppError::NotFound)?;
    let models = state
        .engine
        .providers()
        .models(kind)
        .await
        .map_err(|e| match e {
            LlmError::NotConfigured(_) => AppError::NotFound(e.to_string()),
            other => AppError::Upstream(other.to_string()),
        })?;

    Ok(Json(ApiResponse::success(models, start)))
}
