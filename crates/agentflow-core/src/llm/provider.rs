//! LlmProvider trait definition.
//!
//! This is the core abstraction that all model providers implement.

use agentflow_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities,
};

/// Trait for model provider backends (Ollama, OpenAI, Gemini, Anthropic).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Agent nodes
/// only need whole responses, so there is no streaming entry point.
///
/// Implementations live in agentflow-infra.
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "ollama", "anthropic").
    fn name(&self) -> &str;

    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;

    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;

    /// Models this provider can serve. Providers without a listing endpoint
    /// report only their default model.
    fn list_models(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, LlmError>> + Send {
        let model = self.default_model().to_string();
        async move { Ok(vec![model]) }
    }
}
