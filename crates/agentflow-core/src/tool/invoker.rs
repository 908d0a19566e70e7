//! Uniform tool dispatch with timeouts and schema-checked arguments.

use std::sync::Arc;
use std::time::Duration;

use agentflow_types::tool::{ToolDescriptor, ToolRequest, ToolResponse};
use serde_json::Value;

use crate::error::ToolError;

use super::registry::{ExternalTool, RegisteredTool, ToolRegistry};
use super::transport::{BoxToolTransport, TransportError};

/// Dispatches calls by tool name.
///
/// In-process tools run under the per-call timeout. External tools go
/// through the transport and get `external_retries` extra attempts when the
/// failure is transient (connection errors, 5xx, timeouts). An `{error}`
/// envelope is never retried.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    transport: Option<BoxToolTransport>,
    default_timeout: Duration,
    external_retries: u32,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            transport: None,
            default_timeout,
            external_retries: 1,
        }
    }

    pub fn with_transport(mut self, transport: BoxToolTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_external_retries(mut self, retries: u32) -> Self {
        self.external_retries = retries;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Descriptors for `names`, skipping unknown ones.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|n| self.registry.get(n))
            .map(|t| t.descriptor().clone())
            .collect()
    }

    /// Call `name` with `arguments`.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self.registry.get(name).ok_or_else(|| ToolError::NotFound {
            tool: name.to_string(),
        })?;

        self.registry
            .check_arguments(name, &arguments)
            .map_err(|reason| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })?;

        match tool {
            RegisteredTool::Internal(internal) => {
                let timeout = self.default_timeout;
                tracing::debug!(tool = name, "invoking internal tool");
                tokio::time::timeout(timeout, internal.call(arguments))
                    .await
                    .map_err(|_| ToolError::Timeout {
                        tool: name.to_string(),
                        timeout_secs: timeout.as_secs(),
                    })?
            }
            RegisteredTool::External(external) => self.invoke_external(external, arguments).await,
        }
    }

    async fn invoke_external(
        &self,
        tool: &ExternalTool,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let name = tool.descriptor.name.as_str();
        let transport = self.transport.as_ref().ok_or_else(|| ToolError::RemoteFailure {
            tool: name.to_string(),
            reason: "no external tool transport configured".to_string(),
        })?;

        let timeout = tool
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let request = ToolRequest {
            tool_name: name.to_string(),
            arguments,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(tool = name, endpoint = %tool.endpoint, attempt, "invoking external tool");

            let outcome = match tokio::time::timeout(
                timeout,
                transport.send(&tool.endpoint, &request, timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match outcome {
                Ok(ToolResponse::Ok { result }) => return Ok(result),
                Ok(ToolResponse::Err { error }) => {
                    return Err(ToolError::RemoteFailure {
                        tool: name.to_string(),
                        reason: error,
                    });
                }
                Err(e) if e.is_transient() && attempt <= self.external_retries => {
                    tracing::warn!(tool = name, attempt, error = %e, "transient tool failure, retrying");
                }
                Err(TransportError::Timeout) => {
                    return Err(ToolError::Timeout {
                        tool: name.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                Err(e) => {
                    return Err(ToolError::RemoteFailure {
                        tool: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
