//! Tool descriptor and remote envelope types.

use serde::{Deserialize, Serialize};

/// Where a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// In-process function.
    Internal,
    /// Reached through the remote envelope protocol.
    External,
}

/// Describes a tool to callers and to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub input_schema: serde_json::Value,
    pub kind: ToolKind,
}

/// Request envelope sent to an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Response envelope from an external tool: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Ok { result: serde_json::Value },
    Err { error: String },
}
