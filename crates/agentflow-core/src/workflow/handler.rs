//! Node handlers.
//!
//! One variant per node type, one capability: `execute(state) -> NodeResult`.
//! Handlers never touch the store; the engine merges `state_delta`, commits
//! the checkpoint and acts on `interrupt`. Handlers that wait on a model or
//! a tool race the wait against the cancellation token and check it again
//! between sub-steps.

use agentflow_types::agent::Agent;
use agentflow_types::config::EngineConfig;
use agentflow_types::execution::{ExecutionState, InterruptRequest};
use agentflow_types::llm::{CompletionRequest, Message};
use agentflow_types::workflow::{
    AgentNodeConfig, HumanNodeConfig, Node, NodeType, OnToolError, OutputFormat, ToolNodeConfig,
    WorkflowConfig,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::error::{EvaluationError, NodeError, ToolError};
use crate::llm::ProviderRegistry;
use crate::tool::ToolInvoker;

use super::context::{render_template, render_value};
use super::dag::CompiledNode;
use super::expression::WorkflowEvaluator;

/// What a handler produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeResult {
    /// `None` means the execution is complete after this node.
    pub next_node_id: Option<String>,
    pub state_delta: ExecutionState,
    pub interrupt: Option<InterruptRequest>,
}

/// Everything a handler may call out to.
pub struct NodeServices<'a> {
    pub providers: &'a ProviderRegistry,
    pub tools: &'a ToolInvoker,
    pub workflow: &'a WorkflowConfig,
    pub engine: &'a EngineConfig,
}

/// Per-type node behavior with its typed configuration.
#[derive(Debug, Clone)]
pub enum NodeHandler {
    Start,
    End,
    Agent(AgentNodeConfig),
    Tool(ToolNodeConfig),
    Human(HumanNodeConfig),
    Conditional,
}

impl NodeHandler {
    /// Lift a node's open config map into its typed handler.
    pub fn from_node(node: &Node) -> Result<Self, String> {
        let config = Value::Object(node.config.clone());
        let handler = match node.node_type {
            NodeType::Start => NodeHandler::Start,
            NodeType::End => NodeHandler::End,
            NodeType::Conditional => NodeHandler::Conditional,
            NodeType::Agent => NodeHandler::Agent(
                serde_json::from_value(config).map_err(|e| format!("invalid agent config: {e}"))?,
            ),
            NodeType::Tool => NodeHandler::Tool(
                serde_json::from_value(config).map_err(|e| format!("invalid tool config: {e}"))?,
            ),
            NodeType::Human => NodeHandler::Human(
                serde_json::from_value(config).map_err(|e| format!("invalid human config: {e}"))?,
            ),
        };
        Ok(handler)
    }

    /// The stored agent an agent node names, if any.
    pub fn agent_id(&self) -> Option<Uuid> {
        match self {
            NodeHandler::Agent(config) => config.agent_id,
            _ => None,
        }
    }

    pub async fn execute(
        &self,
        execution_id: Uuid,
        node: &CompiledNode,
        state: &ExecutionState,
        services: &NodeServices<'_>,
        cancel: &CancellationToken,
    ) -> Result<NodeResult, NodeError> {
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        match self {
            NodeHandler::Start => Ok(NodeResult {
                next_node_id: single_route(node),
                ..Default::default()
            }),
            NodeHandler::End => Ok(NodeResult::default()),
            NodeHandler::Agent(config) => {
                let state_delta =
                    run_agent(execution_id, &node.id, config, state, services, cancel).await?;
                Ok(NodeResult {
                    next_node_id: single_route(node),
                    state_delta,
                    interrupt: None,
                })
            }
            NodeHandler::Tool(config) => {
                let state_delta = run_tool(node, config, state, services, cancel).await?;
                Ok(NodeResult {
                    next_node_id: single_route(node),
                    state_delta,
                    interrupt: None,
                })
            }
            NodeHandler::Human(config) => Ok(NodeResult {
                next_node_id: single_route(node),
                state_delta: Map::new(),
                interrupt: Some(InterruptRequest {
                    prompt: render_template(&config.prompt, state),
                    input_schema: config.input_schema.clone(),
                    timeout_secs: config.timeout_secs,
                }),
            }),
            NodeHandler::Conditional => {
                // jexl evaluators are not Send, so one lives only for this call.
                let target = choose_route(node, state, &WorkflowEvaluator::new())?;
                Ok(NodeResult {
                    next_node_id: Some(target),
                    ..Default::default()
                })
            }
        }
    }
}

fn single_route(node: &CompiledNode) -> Option<String> {
    node.routes.first().map(|r| r.target.clone())
}

/// First guarded route that evaluates true, else the unguarded default.
fn choose_route(
    node: &CompiledNode,
    state: &ExecutionState,
    evaluator: &WorkflowEvaluator,
) -> Result<String, EvaluationError> {
    for route in &node.routes {
        if let Some(guard) = &route.guard {
            if evaluator.evaluate_guard(guard, state)? {
                tracing::debug!(node_id = %node.id, target = %route.target, guard = %guard, "guard matched");
                return Ok(route.target.clone());
            }
        }
    }

    node.routes
        .iter()
        .find(|r| r.guard.is_none())
        .map(|r| r.target.clone())
        .ok_or_else(|| EvaluationError::NoBranchMatched {
            node_id: node.id.clone(),
        })
}

// ---------------------------------------------------------------------------
// Tool node
// ---------------------------------------------------------------------------

async fn run_tool(
    node: &CompiledNode,
    config: &ToolNodeConfig,
    state: &ExecutionState,
    services: &NodeServices<'_>,
    cancel: &CancellationToken,
) -> Result<ExecutionState, NodeError> {
    let arguments = render_value(&Value::Object(config.arguments.clone()), state);

    let outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(NodeError::Cancelled),
        outcome = services.tools.invoke(&config.tool_name, arguments) => outcome,
    };

    let mut delta = Map::new();
    match outcome {
        Ok(result) => {
            let key = config
                .output_key
                .clone()
                .unwrap_or_else(|| format!("{}_result", node.id));
            delta.insert(key, result);
        }
        Err(error) if config.on_error == OnToolError::Continue => {
            tracing::warn!(node_id = %node.id, tool = %config.tool_name, %error, "tool failed, continuing");
            delta.insert(
                format!("{}_error", node.id),
                serde_json::to_value(&error).unwrap_or_else(|_| json!(error.to_string())),
            );
        }
        Err(error) => return Err(error.into()),
    }
    Ok(delta)
}

// ---------------------------------------------------------------------------
// Agent node
// ---------------------------------------------------------------------------

/// Fill the fields an agent node leaves unset from its stored agent.
pub fn merge_agent(config: &AgentNodeConfig, agent: &Agent) -> AgentNodeConfig {
    AgentNodeConfig {
        system_prompt: config
            .system_prompt
            .clone()
            .or_else(|| agent.system_prompt.clone()),
        provider: config.provider.or(agent.provider),
        model: config.model.clone().or_else(|| agent.model.clone()),
        temperature: config.temperature.or(agent.temperature),
        max_tokens: config.max_tokens.or(agent.max_tokens),
        tools: if config.tools.is_empty() {
            agent.tools.clone()
        } else {
            config.tools.clone()
        },
        max_iterations: config.max_iterations.or(agent.max_iterations),
        ..config.clone()
    }
}

pub(super) async fn run_agent(
    execution_id: Uuid,
    node_id: &str,
    config: &AgentNodeConfig,
    state: &ExecutionState,
    services: &NodeServices<'_>,
    cancel: &CancellationToken,
) -> Result<ExecutionState, NodeError> {
    let provider = services
        .providers
        .resolve(config.provider.or(services.workflow.provider))?;
    let model = config
        .model
        .clone()
        .or_else(|| services.workflow.model.clone())
        .unwrap_or_else(|| provider.default_model().to_string());

    for name in &config.tools {
        if !services.tools.registry().contains(name) {
            return Err(ToolError::NotFound { tool: name.clone() }.into());
        }
    }

    let mut request = CompletionRequest {
        model,
        messages: vec![Message::user(render_template(&config.prompt, state))],
        system: config
            .system_prompt
            .as_ref()
            .map(|s| render_template(s, state)),
        max_tokens: config.max_tokens.unwrap_or(services.engine.max_tokens),
        temperature: config.temperature,
        tools: services.tools.descriptors_for(&config.tools),
    };

    let max_iterations = config
        .max_iterations
        .unwrap_or(services.engine.max_agent_iterations);

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.provider.name = provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            execution_id = %execution_id,
            node_id = %node_id,
            iteration,
        );
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(NodeError::Cancelled),
            response = provider.complete(&request).instrument(span) => response?,
        };
        tracing::debug!(
            execution_id = %execution_id,
            node_id = %node_id,
            iteration,
            gen_ai.usage.input_tokens = response.usage.input_tokens,
            gen_ai.usage.output_tokens = response.usage.output_tokens,
            tool_calls = response.tool_calls.len(),
            "model responded"
        );

        if response.tool_calls.is_empty() {
            return agent_output(node_id, config, &response.content);
        }

        request
            .messages
            .push(Message::assistant(response.content.clone(), response.tool_calls.clone()));

        for call in &response.tool_calls {
            if cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let content = if !config.tools.contains(&call.name) {
                json!({ "error": format!("tool '{}' is not available to this agent", call.name) })
            } else {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return Err(NodeError::Cancelled),
                    outcome = services.tools.invoke(&call.name, call.arguments.clone()) => outcome,
                };
                match outcome {
                    Ok(result) => json!({ "result": result }),
                    Err(error) => {
                        tracing::debug!(node_id = %node_id, tool = %call.name, %error, "tool error returned to model");
                        json!({ "error": error.to_string() })
                    }
                }
            };
            request
                .messages
                .push(Message::tool_result(call.id.clone(), content.to_string()));
        }
    }

    Err(NodeError::IterationLimit {
        max: max_iterations,
    })
}

/// Turn the model's final answer into a state delta.
fn agent_output(
    node_id: &str,
    config: &AgentNodeConfig,
    content: &str,
) -> Result<ExecutionState, NodeError> {
    let key = config
        .output_key
        .clone()
        .unwrap_or_else(|| format!("{node_id}_output"));
    let mut delta = Map::new();

    match config.output_format {
        OutputFormat::Text => {
            delta.insert(key, Value::String(content.to_string()));
        }
        OutputFormat::Json => {
            let parsed: Value = serde_json::from_str(strip_code_fence(content)).map_err(|e| {
                NodeError::Failed(format!("agent output is not valid JSON: {e}"))
            })?;
            match parsed {
                Value::Object(fields) => delta.extend(fields),
                other => {
                    delta.insert(key, other);
                }
            }
        }
    }
    Ok(delta)
}

/// Models often wrap JSON in a ```json fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
