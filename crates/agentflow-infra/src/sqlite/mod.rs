//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod agent;
pub mod checkpoint;
pub mod execution;
pub mod pool;
pub mod store;
pub mod workflow;

pub use pool::DatabasePool;
pub use store::SqliteWorkflowStore;
