//! Workflow definition types for AgentFlow.
//!
//! A `WorkflowDefinition` is a directed graph of typed nodes joined by edges.
//! Definitions are authored as JSON; node configuration stays an open map so
//! that the validator can report every missing or malformed field at once,
//! and the compiler then lifts it into the typed `*NodeConfig` structs below.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ProviderKind;

/// Open configuration map carried by every node.
pub type NodeConfigMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declared workflow graph.
///
/// Immutable once an execution references it: edits are stored as a new
/// `version` under the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on first save.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Monotonic version number, starting at 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle status. New definitions start as drafts.
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Nodes in declaration order.
    pub nodes: Vec<Node>,
    /// Edges in declaration order. Order matters for conditional routing.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Initial execution state, overlaid by the execution input.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Workflow-level defaults.
    #[serde(default)]
    pub config: WorkflowConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of `node_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// Workflow-level defaults applied to every node unless overridden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Default model provider for agent nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    /// Default model name for agent nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Default retry policy for nodes without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Default per-node timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => write!(f, "draft"),
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "paused" => Ok(WorkflowStatus::Paused),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("unknown workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes and Edges
// ---------------------------------------------------------------------------

/// A single unit of work in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the definition.
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-type configuration, validated and typed by the compiler.
    #[serde(default)]
    pub config: NodeConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Per-invocation timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Agent,
    Tool,
    Human,
    Conditional,
    End,
}

impl NodeType {
    /// Config keys that must be present for this node type.
    pub fn required_config(&self) -> &'static [&'static str] {
        match self {
            NodeType::Agent => &["prompt"],
            NodeType::Tool => &["tool_name"],
            NodeType::Human => &["prompt"],
            NodeType::Start | NodeType::Conditional | NodeType::End => &[],
        }
    }

    /// Whether a cycle passing through this node is allowed.
    pub fn is_loop_capable(&self) -> bool {
        matches!(self, NodeType::Conditional)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Start => "start",
            NodeType::Agent => "agent",
            NodeType::Tool => "tool",
            NodeType::Human => "human",
            NodeType::Conditional => "conditional",
            NodeType::End => "end",
        };
        f.write_str(s)
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    /// Guard expression, only evaluated when `source` is a conditional node.
    #[serde(default, alias = "condition", skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff.
///
/// `max_attempts` counts the first invocation, so the default of 1 means no
/// retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed per-node configuration
// ---------------------------------------------------------------------------

/// Configuration of an `agent` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    /// User prompt template, rendered against execution state.
    pub prompt: String,
    /// Stored agent supplying defaults for the fields below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tools the model may call. Empty means no tool use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Upper bound on model round-trips in the tool loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// State key for text output. Defaults to `<node_id>_output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// How an agent's final answer is merged into state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Stored as a string under the output key.
    #[default]
    Text,
    /// Parsed as JSON; objects merge key by key, other values go under the output key.
    Json,
}

/// Configuration of a `tool` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolNodeConfig {
    pub tool_name: String,
    /// Arguments; string values are templates rendered against state.
    #[serde(default, alias = "tool_args")]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// State key for the result. Defaults to `<node_id>_result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default)]
    pub on_error: OnToolError,
}

/// What a tool node does with a tool error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnToolError {
    /// Fail the node (and retry per policy).
    #[default]
    Fail,
    /// Record the error under `<node_id>_error` and continue.
    Continue,
}

/// Configuration of a `human` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanNodeConfig {
    /// Prompt template shown to the responder.
    pub prompt: String,
    /// JSON schema describing the expected response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// After this many seconds the interaction times out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Lightweight projection used by list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub version: u32,
    pub name: String,
    pub status: WorkflowStatus,
    pub node_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(def: &WorkflowDefinition) -> Self {
        Self {
            id: def.id,
            version: def.version,
            name: def.name.clone(),
            status: def.status,
            node_count: def.nodes.len(),
            updated_at: def.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
