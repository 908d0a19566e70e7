//! Provider registry for runtime provider lookup.

use std::collections::HashMap;

use agentflow_types::llm::{LlmError, ProviderKind, ProviderModels};

use super::box_provider::BoxLlmProvider;

/// Registry of available model providers, indexed by kind.
///
/// Built once at startup and shared read-only. `default_kind` is used when
/// neither the node nor the workflow names a provider.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, BoxLlmProvider>,
    default_kind: ProviderKind,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new(default_kind: ProviderKind) -> Self {
        Self {
            providers: HashMap::new(),
            default_kind,
        }
    }

    /// Register a provider under the given kind, replacing any previous one.
    pub fn register(&mut self, kind: ProviderKind, provider: BoxLlmProvider) {
        self.providers.insert(kind, provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&BoxLlmProvider> {
        self.providers.get(&kind)
    }

    /// Resolve `kind` (or the default) to a provider.
    pub fn resolve(&self, kind: Option<ProviderKind>) -> Result<&BoxLlmProvider, LlmError> {
        let kind = kind.unwrap_or(self.default_kind);
        self.providers
            .get(&kind)
            .ok_or_else(|| LlmError::NotConfigured(kind.to_string()))
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default_kind
    }

    /// Models the `kind` provider reports, with its default model.
    pub async fn models(&self, kind: ProviderKind) -> Result<ProviderModels, LlmError> {
        let provider = self.resolve(Some(kind))?;
        let models = provider.list_models().await?;
        Ok(ProviderModels {
            provider: kind,
            default_model: provider.default_model().to_string(),
            models,
        })
    }

    /// Registered provider kinds in declaration order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ProviderKind::Ollama)
    }
}
