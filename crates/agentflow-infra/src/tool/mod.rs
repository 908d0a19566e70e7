//! Transports for external tools.

pub mod http;

pub use http::HttpToolTransport;
