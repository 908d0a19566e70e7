//! Model provider abstractions.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `ProviderRegistry`: providers keyed by `ProviderKind`

pub mod box_provider;
pub mod provider;
pub mod registry;

pub use box_provider::BoxLlmProvider;
pub use provider::LlmProvider;
pub use registry::ProviderRegistry;
