//! HTTP/REST API layer.
//!
//! Axum router at `/api/v1/` with the envelope response format, CORS and
//! request tracing.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
