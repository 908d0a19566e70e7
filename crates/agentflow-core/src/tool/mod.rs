//! Uniform tool dispatch.
//!
//! - `Tool` / `BoxTool`: in-process tools
//! - `ToolTransport` / `BoxToolTransport`: the remote envelope protocol
//! - `ToolRegistry`: immutable name -> tool map built at startup
//! - `ToolInvoker`: timeouts, argument checks and the external retry

pub mod builtin;
pub mod internal;
pub mod invoker;
pub mod registry;
pub mod transport;

pub use invoker::ToolInvoker;
pub use registry::{RegisteredTool, ToolRegistry};
pub use internal::{BoxTool, Tool};
pub use transport::{BoxToolTransport, ToolTransport, TransportError};
