//! Request extractors and body helpers shared by the handlers.

pub mod query;
