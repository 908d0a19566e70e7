//! In-process tool trait and its type-erased wrapper.

use std::future::Future;
use std::pin::Pin;

use agentflow_types::tool::ToolDescriptor;
use serde_json::Value;

use crate::error::ToolError;

/// An in-process tool.
///
/// `arguments` has already been checked against the descriptor's schema
/// (object shape and required keys) by the invoker.
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    fn call(&self, arguments: Value) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

/// Object-safe version of [`Tool`] with a boxed future.
pub trait ToolDyn: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    fn call_boxed(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn descriptor(&self) -> &ToolDescriptor {
        Tool::descriptor(self)
    }

    fn call_boxed(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(self.call(arguments))
    }
}

/// Type-erased in-process tool.
pub struct BoxTool {
    inner: Box<dyn ToolDyn + Send + Sync>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        self.inner.descriptor()
    }

    pub async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        self.inner.call_boxed(arguments).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool")
            .field("name", &self.descriptor().name)
            .finish()
    }
}
