//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. Tool calls round-trip as `tool_use` and
//! `tool_result` content blocks.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use agentflow_core::llm::LlmProvider;
use agentflow_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, MessageRole, ProviderCapabilities,
    StopReason, ToolCall, Usage,
};

use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicRequest, AnthropicResponse, AnthropicTool,
};
use crate::llm::{fetch_model_ids, map_http_error};

/// Anthropic Claude LLM provider.
///
/// # API Key Security
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers. It never appears in Debug output,
/// Display output, or tracing logs.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Anthropic API key wrapped in SecretString
    /// * `model` - Default model identifier (e.g., "claude-sonnet-4-20250514")
    pub fn new(api_key: SecretString, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // 5 min timeout for long generations
            .build()
            .unwrap_or_default();

        let capabilities = Self::capabilities_for_model(&model);

        Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
            capabilities,
        }
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Determine capabilities based on model name.
    fn capabilities_for_model(model: &str) -> ProviderCapabilities {
        let max_output_tokens = if model.contains("opus") {
            32_000
        } else if model.contains("sonnet") || model.contains("haiku") {
            8_192
        } else {
            // Conservative default for unknown models
            4_096
        };

        ProviderCapabilities {
            tool_calling: true,
            max_context_tokens: 200_000,
            max_output_tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a generic [`CompletionRequest`] into an [`AnthropicRequest`].
    ///
    /// System messages are folded into the top-level `system` field. Tool
    /// results become `tool_result` blocks on a user turn, and consecutive
    /// results share one turn as the API requires.
    fn to_anthropic_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        let mut messages: Vec<AnthropicMessage> = Vec::new();

        for msg in &request.messages {
            match msg.role {
                MessageRole::System => system_parts.push(msg.content.clone()),
                MessageRole::User => messages.push(AnthropicMessage {
                    role: "user".into(),
                    content: vec![AnthropicContentBlock::Text {
                        text: msg.content.clone(),
                    }],
                }),
                MessageRole::Assistant => {
                    let mut content = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(AnthropicContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    content.extend(msg.tool_calls.iter().map(|call| {
                        AnthropicContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        }
                    }));
                    messages.push(AnthropicMessage {
                        role: "assistant".into(),
                        content,
                    });
                }
                MessageRole::Tool => {
                    let block = AnthropicContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match messages.last_mut() {
                        Some(last)
                            if last.role == "user"
                                && last.content.iter().all(|b| {
                                    matches!(b, AnthropicContentBlock::ToolResult { .. })
                                }) =>
                        {
                            last.content.push(block);
                        }
                        _ => messages.push(AnthropicMessage {
                            role: "user".into(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        let tools = request
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect();

        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        AnthropicRequest {
            model,
            max_tokens: request.max_tokens,
            messages,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            temperature: request.temperature,
            tools,
        }
    }
}

/// Map an Anthropic stop reason string to [`StopReason`].
fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn into_completion(response: AnthropicResponse) -> CompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unknown => {}
        }
    }

    CompletionResponse {
        id: response.id,
        content: text,
        model: response.model,
        tool_calls,
        stop_reason: map_stop_reason(response.stop_reason.as_deref()),
        usage: Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    }
}

// AnthropicProvider intentionally does NOT derive Debug.

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.to_anthropic_request(request);
        let url = self.url("/v1/messages");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status.as_u16(), retry_after.as_deref(), error_body));
        }

        let anthropic_resp: AnthropicResponse = response.json().await.map_err(|e| {
            LlmError::Deserialization(format!("failed to parse response: {e}"))
        })?;

        Ok(into_completion(anthropic_resp))
    }

    /// `GET /v1/models`, first page only.
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let http = self
            .client
            .get(self.url("/v1/models"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION);
        fetch_model_ids(http).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::llm::Message;
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            SecretString::from("sk-ant-test"),
            "claude-sonnet-4-20250514".to_string(),
        )
    }

    #[tokio::test]
    async fn test_list_models_sends_version_header() {
        let (url, head) = crate::llm::serve_once(
            "200 OK",
            r#"{"data":[{"id":"claude-sonnet-4-20250514","type":"model"}],"has_more":false}"#,
        )
        .await;
        let provider = provider().with_base_url(url.trim_end_matches("/v1").to_string());

        let models = provider.list_models().await.unwrap();
        assert_eq!(models, vec!["claude-sonnet-4-20250514".to_string()]);

        let head = head.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /v1/models "), "{head}");
        assert!(head.contains("x-api-key: sk-ant-test"), "{head}");
        assert!(head.contains("anthropic-version:"), "{head}");
    }

    #[test]
    fn test_capabilities_for_model() {
        assert_eq!(
            AnthropicProvider::capabilities_for_model("claude-opus-4").max_output_tokens,
            32_000
        );
        assert_eq!(
            AnthropicProvider::capabilities_for_model("something-else").max_output_tokens,
            4_096
        );
    }

    #[test]
    fn test_request_merges_consecutive_tool_results() {
        let request = CompletionRequest {
            model: String::new(),
            messages: vec![
                Message {
                    role: MessageRole::System,
                    content: "Reply in English".into(),
                    tool_calls: vec![],
                    tool_call_id: None,
                },
                Message::user("Compare two cities"),
                Message::assistant(
                    "Looking up both.",
                    vec![
                        ToolCall {
                            id: "a".into(),
                            name: "weather".into(),
                            arguments: json!({ "city": "Oslo" }),
                        },
                        ToolCall {
                            id: "b".into(),
                            name: "weather".into(),
                            arguments: json!({ "city": "Rome" }),
                        },
                    ],
                ),
                Message::tool_result("a", "cold"),
                Message::tool_result("b", "warm"),
            ],
            system: Some("Be brief".into()),
            max_tokens: 256,
            temperature: None,
            tools: vec![],
        };

        let body = serde_json::to_value(provider().to_anthropic_request(&request)).unwrap();

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["system"], "Be brief\n\nReply in English");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["city"], "Oslo");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "b");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_into_completion_collects_tool_use() {
        let raw = json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-20250514",
            "content": [
                { "type": "text", "text": "Checking." },
                { "type": "tool_use", "id": "toolu_1", "name": "calculator",
                  "input": { "expression": "6 * 7" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 20, "output_tokens": 9 }
        });
        let resp = into_completion(serde_json::from_value(raw).unwrap());
        assert_eq!(resp.content, "Checking.");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["expression"], "6 * 7");
        assert_eq!(resp.usage.output_tokens, 9);
    }

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(map_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(None), StopReason::EndTurn);
    }
}
