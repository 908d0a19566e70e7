//! Stored agent profiles.
//!
//! An agent bundles the model settings an `agent` node would otherwise repeat
//! inline: provider, model, system prompt, tools and sampling. A node names
//! one by `agent_id` and may still override any field in its own config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ProviderKind;

/// A reusable agent profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Provider used when the node does not pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of an agent create or replace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Agent {
    /// A new agent with a fresh UUIDv7.
    pub fn from_spec(spec: AgentSpec, now: DateTime<Utc>) -> Self {
        let mut agent = Self {
            id: Uuid::now_v7(),
            name: String::new(),
            description: None,
            provider: None,
            model: None,
            system_prompt: None,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            max_iterations: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        agent.apply(spec, now);
        agent
    }

    /// Replace every editable field with `spec`. Id and creation time stay.
    pub fn apply(&mut self, spec: AgentSpec, now: DateTime<Utc>) {
        self.name = spec.name.trim().to_string();
        self.description = spec.description;
        self.provider = spec.provider;
        self.model = spec.model;
        self.system_prompt = spec.system_prompt;
        self.tools = spec.tools;
        self.temperature = spec.temperature;
        self.max_tokens = spec.max_tokens;
        self.max_iterations = spec.max_iterations;
        self.tags = spec.tags;
        self.updated_at = now;
    }
}

/// Outcome of a one-off agent run outside any workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTestResult {
    pub agent_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults() {
        let spec: AgentSpec = serde_json::from_value(json!({ "name": "triage" })).unwrap();
        assert!(spec.provider.is_none());
        assert!(spec.tools.is_empty());
        assert!(spec.max_iterations.is_none());
    }

    #[test]
    fn test_apply_keeps_identity() {
        let created = Utc::now();
        let mut agent = Agent::from_spec(
            AgentSpec {
                name: "  triage ".into(),
                model: Some("llama3".into()),
                ..Default::default()
            },
            created,
        );
        assert_eq!(agent.name, "triage");
        let id = agent.id;

        let later = created + chrono::Duration::seconds(5);
        agent.apply(
            AgentSpec {
                name: "triage".into(),
                provider: Some(ProviderKind::OpenAi),
                ..Default::default()
            },
            later,
        );
        assert_eq!(agent.id, id);
        assert_eq!(agent.created_at, created);
        assert_eq!(agent.updated_at, later);
        assert_eq!(agent.provider, Some(ProviderKind::OpenAi));
        assert!(agent.model.is_none(), "replace clears omitted fields");
    }

    #[test]
    fn test_provider_serializes_lowercase() {
        let agent = Agent::from_spec(
            AgentSpec {
                name: "writer".into(),
                provider: Some(ProviderKind::OpenAi),
                ..Default::default()
            },
            Utc::now(),
        );
        let value = serde_json::to_value(&agent).unwrap();
        assert_eq!(value["provider"], "openai");
        assert!(value.get("model").is_none());
    }
}
