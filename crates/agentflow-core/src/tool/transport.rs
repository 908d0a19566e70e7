//! Port for the remote tool envelope protocol.
//!
//! A transport carries `{tool_name, arguments}` to an endpoint and returns
//! the `{result} | {error}` envelope. It only classifies *transport*
//! failures; an `{error}` envelope is a successful round-trip.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use agentflow_types::tool::{ToolRequest, ToolResponse};

/// Why a request did not produce an envelope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection reset, refused, 5xx and similar. Worth one more try.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// The call did not finish within the given timeout.
    #[error("request timed out")]
    Timeout,

    /// 4xx, undecodable body and similar. Retrying cannot help.
    #[error("transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_) | TransportError::Timeout)
    }
}

/// Delivers tool requests to external endpoints.
///
/// Implemented over HTTP in agentflow-infra.
pub trait ToolTransport: Send + Sync {
    fn send(
        &self,
        endpoint: &str,
        request: &ToolRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<ToolResponse, TransportError>> + Send;
}

/// Object-safe version of [`ToolTransport`].
pub trait ToolTransportDyn: Send + Sync {
    fn send_boxed<'a>(
        &'a self,
        endpoint: &'a str,
        request: &'a ToolRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ToolResponse, TransportError>> + Send + 'a>>;
}

impl<T: ToolTransport> ToolTransportDyn for T {
    fn send_boxed<'a>(
        &'a self,
        endpoint: &'a str,
        request: &'a ToolRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ToolResponse, TransportError>> + Send + 'a>> {
        Box::pin(self.send(endpoint, request, timeout))
    }
}

/// Type-erased tool transport.
pub struct BoxToolTransport {
    inner: Box<dyn ToolTransportDyn + Send + Sync>,
}

impl BoxToolTransport {
    pub fn new<T: ToolTransport + 'static>(transport: T) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub async fn send(
        &self,
        endpoint: &str,
        request: &ToolRequest,
        timeout: Duration,
    ) -> Result<ToolResponse, TransportError> {
        self.inner.send_boxed(endpoint, request, timeout).await
    }
}
