//! Immutable tool registry.
//!
//! Built once at startup from the built-in tools and the `[[tools.external]]`
//! config entries, then shared behind an `Arc`. Nothing registers tools at
//! runtime. Each tool's input schema is compiled once, on registration.

use std::collections::BTreeMap;

use agentflow_types::config::ExternalToolConfig;
use agentflow_types::tool::{ToolDescriptor, ToolKind};
use serde_json::{Value, json};

use crate::schema::SchemaValidator;

use super::builtin;
use super::internal::{BoxTool, Tool};

/// An external tool reached through the envelope protocol.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub descriptor: ToolDescriptor,
    pub endpoint: String,
    pub timeout_secs: Option<u64>,
}

/// A registry entry.
#[derive(Debug)]
pub enum RegisteredTool {
    Internal(BoxTool),
    External(ExternalTool),
}

impl RegisteredTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        match self {
            RegisteredTool::Internal(tool) => tool.descriptor(),
            RegisteredTool::External(tool) => &tool.descriptor,
        }
    }
}

/// A tool with its compiled argument schema.
///
/// A schema that fails to compile is kept as its error so every call to the
/// tool is rejected instead of running unchecked.
#[derive(Debug)]
struct Entry {
    tool: RegisteredTool,
    arguments: Result<SchemaValidator, String>,
}

impl Entry {
    fn new(tool: RegisteredTool) -> Self {
        let arguments = SchemaValidator::compile(&tool.descriptor().input_schema);
        if let Err(e) = &arguments {
            tracing::error!(tool = %tool.descriptor().name, error = %e, "tool input schema does not compile");
        }
        Self { tool, arguments }
    }
}

/// Name-indexed tools, listed in name order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `calculator`, `text_processor` and `file_reader`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_internal(builtin::CalculatorTool::new());
        registry.register_internal(builtin::TextProcessorTool::new());
        registry.register_internal(builtin::FileReaderTool::new());
        registry
    }

    /// Add an in-process tool, replacing any tool with the same name.
    pub fn register_internal<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.descriptor().name.clone();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "replacing already registered tool");
        }
        self.tools
            .insert(name, Entry::new(RegisteredTool::Internal(BoxTool::new(tool))));
    }

    /// Add an external tool from its config declaration.
    pub fn register_external(&mut self, config: &ExternalToolConfig) {
        if self.tools.contains_key(&config.name) {
            tracing::warn!(tool = %config.name, "replacing already registered tool");
        }
        let descriptor = ToolDescriptor {
            name: config.name.clone(),
            description: config.description.clone(),
            input_schema: config
                .input_schema
                .clone()
                .unwrap_or_else(|| json!({ "type": "object" })),
            kind: ToolKind::External,
        };
        self.tools.insert(
            config.name.clone(),
            Entry::new(RegisteredTool::External(ExternalTool {
                descriptor,
                endpoint: config.endpoint.clone(),
                timeout_secs: config.timeout_secs,
            })),
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name).map(|e| &e.tool)
    }

    /// Check `arguments` against the input schema of `name`.
    ///
    /// `Err` carries the reason: every schema violation, or why the schema
    /// itself is unusable. Unknown tools pass; lookup reports those.
    pub fn check_arguments(&self, name: &str, arguments: &Value) -> Result<(), String> {
        match self.tools.get(name).map(|e| &e.arguments) {
            None => Ok(()),
            Some(Ok(validator)) => validator.check(arguments),
            Some(Err(e)) => Err(format!("tool input schema is invalid: {e}")),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors of every registered tool.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|e| e.tool.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
