//! Global configuration types for AgentFlow.
//!
//! `AppConfig` represents the top-level `config.toml`: engine limits, model
//! provider endpoints, external tool declarations and the HTTP listener.

use serde::{Deserialize, Serialize};

use crate::llm::ProviderKind;
use crate::workflow::RetryPolicy;

/// Top-level configuration.
///
/// Loaded from `~/.agentflow/config.toml`. All fields have defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Limits and defaults for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default per-node invocation timeout.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Per tool call timeout.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Extra attempts for an external tool on transient transport failure.
    #[serde(default = "default_external_tool_retries")]
    pub external_tool_retries: u32,
    /// Bound on model round-trips inside one agent node.
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: u32,
    /// Default output token limit for agent calls.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Period of the timed-out interaction sweep.
    #[serde(default = "default_interaction_sweep_secs")]
    pub interaction_sweep_secs: u64,
    /// Retry policy for nodes that declare none.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_external_tool_retries() -> u32 {
    1
}

fn default_max_agent_iterations() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_interaction_sweep_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            external_tool_retries: default_external_tool_retries(),
            max_agent_iterations: default_max_agent_iterations(),
            max_tokens: default_max_tokens(),
            interaction_sweep_secs: default_interaction_sweep_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Model provider endpoints, keyed by provider kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when neither the node nor the workflow picks one.
    #[serde(default = "default_provider")]
    pub default: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderEndpoint>,
}

impl ProvidersConfig {
    /// Settings for `kind`, if the config file declares any.
    pub fn endpoint(&self, kind: ProviderKind) -> Option<&ProviderEndpoint> {
        match kind {
            ProviderKind::Ollama => self.ollama.as_ref(),
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            ollama: None,
            openai: None,
            gemini: None,
            anthropic: None,
        }
    }
}

/// Connection settings for one provider.
///
/// API keys are never stored here; they come from the provider's
/// environment variable (`api_key_env`, or the conventional default).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools reached through the remote envelope protocol.
    #[serde(default)]
    pub external: Vec<ExternalToolConfig>,
}

/// Declaration of an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    pub name: String,
    /// HTTP endpoint accepting `{tool_name, arguments}`.
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments; defaults to an open object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Overrides `engine.tool_timeout_secs` for this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
