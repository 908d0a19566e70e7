//! Model provider implementations.
//!
//! Contains concrete implementations of the [`LlmProvider`] trait defined in
//! `agentflow-core`: an OpenAI-compatible client (Ollama, OpenAI, Gemini)
//! and an Anthropic client.
//!
//! Also provides the registry factory ([`build_provider_registry`]) that
//! constructs every usable provider from the `[providers]` config section,
//! and a connection test ([`test_provider_connection`]) used by the CLI.
//!
//! [`LlmProvider`]: agentflow_core::llm::LlmProvider

pub mod anthropic;
pub mod openai_compat;

use secrecy::SecretString;
use serde::Deserialize;

use agentflow_core::llm::{BoxLlmProvider, ProviderRegistry};
use agentflow_types::config::{ProviderEndpoint, ProvidersConfig};
use agentflow_types::llm::{CompletionRequest, LlmError, Message, ProviderKind};

use self::anthropic::AnthropicProvider;
use self::openai_compat::OpenAiCompatibleProvider;

/// Map a non-success HTTP status onto the provider error taxonomy.
pub(crate) fn map_http_error(status: u16, retry_after: Option<&str>, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000),
        },
        400 | 404 | 413 | 422 => LlmError::InvalidRequest(body),
        503 | 529 => LlmError::Overloaded(body),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

/// Model listing body shared by the OpenAI-compatible and Anthropic APIs.
#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Send a prepared model listing request and collect the model ids.
pub(crate) async fn fetch_model_ids(
    request: reqwest::RequestBuilder,
) -> Result<Vec<String>, LlmError> {
    let response = request.send().await.map_err(|e| LlmError::Provider {
        message: format!("HTTP request failed: {e}"),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_http_error(status.as_u16(), None, body));
    }

    let list: ModelList = response.json().await.map_err(|e| {
        LlmError::Deserialization(format!("failed to parse model list: {e}"))
    })?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}

/// Conventional environment variable holding the API key for `kind`.
pub fn default_api_key_env(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Ollama => None,
        ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
        ProviderKind::Gemini => Some("GEMINI_API_KEY"),
        ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
    }
}

/// Model used when neither the config nor the node names one.
pub fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Ollama => "llama3.1",
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Gemini => "gemini-2.0-flash",
        ProviderKind::Anthropic => "claude-sonnet-4-20250514",
    }
}

/// Build the provider registry from configuration and the process environment.
///
/// Ollama is always registered since it needs no credentials. Key-based
/// providers are registered only when their key variable is set; the rest
/// are skipped with a log line and fail at use with `NotConfigured`.
pub fn build_provider_registry(config: &ProvidersConfig) -> ProviderRegistry {
    build_provider_registry_with(config, |name| std::env::var(name).ok())
}

/// Same as [`build_provider_registry`] with an explicit key lookup.
pub fn build_provider_registry_with(
    config: &ProvidersConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(config.default);
    let empty = ProviderEndpoint::default();

    for kind in ProviderKind::ALL {
        let endpoint = config.endpoint(kind).unwrap_or(&empty);

        let api_key = match endpoint
            .api_key_env
            .as_deref()
            .or_else(|| default_api_key_env(kind))
        {
            Some(var) => match lookup(var).filter(|v| !v.trim().is_empty()) {
                Some(value) => Some(SecretString::from(value)),
                None => {
                    tracing::debug!(provider = %kind, env = var, "no API key set, provider disabled");
                    continue;
                }
            },
            None => None,
        };

        let provider = create_provider(kind, endpoint, api_key);
        tracing::debug!(provider = %kind, model = provider.default_model(), "registered provider");
        registry.register(kind, provider);
    }

    if registry.get(config.default).is_none() {
        tracing::warn!(
            provider = %config.default,
            "default provider is not configured; agent nodes must name a provider"
        );
    }

    registry
}

/// Construct one provider. `api_key` is `None` only for Ollama.
fn create_provider(
    kind: ProviderKind,
    endpoint: &ProviderEndpoint,
    api_key: Option<SecretString>,
) -> BoxLlmProvider {
    let model = endpoint
        .model
        .clone()
        .unwrap_or_else(|| default_model(kind).to_string());

    match (kind, api_key) {
        (ProviderKind::Anthropic, Some(key)) => {
            let mut provider = AnthropicProvider::new(key, model);
            if let Some(ref url) = endpoint.base_url {
                provider = provider.with_base_url(url.clone());
            }
            BoxLlmProvider::new(provider)
        }
        (kind, key) => {
            let mut config = match (kind, key) {
                (ProviderKind::OpenAi, Some(key)) => openai_compat::config::openai_defaults(key, &model),
                (ProviderKind::Gemini, Some(key)) => openai_compat::config::gemini_defaults(key, &model),
                (_, key) => {
                    let mut config = openai_compat::config::ollama_defaults(&model);
                    config.api_key = key;
                    config
                }
            };
            if let Some(ref url) = endpoint.base_url {
                config.base_url = url.clone();
            }
            BoxLlmProvider::new(OpenAiCompatibleProvider::new(config))
        }
    }
}

/// Test provider connectivity by sending a minimal completion request.
pub async fn test_provider_connection(provider: &BoxLlmProvider) -> Result<(), LlmError> {
    let request = CompletionRequest {
        model: String::new(), // Provider uses its configured default
        messages: vec![Message::user("Hello")],
        system: None,
        max_tokens: 10,
        temperature: Some(0.0),
        tools: vec![],
    };
    provider.complete(&request).await?;
    Ok(())
}

/// Answer one request with `body` and hand back the request head.
#[cfg(test)]
pub(crate) async fn serve_once(
    status: &'static str,
    body: &'static str,
) -> (String, tokio::sync::oneshot::Receiver<String>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&buf).contains("\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}/v1"), rx)
}
