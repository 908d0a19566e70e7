use thiserror::Error;

/// Errors from repository operations (used by trait definitions in agentflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether the store itself could not be reached, as opposed to a
    /// well-formed rejection of the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RepositoryError::Connection(_) | RepositoryError::Query(_))
    }
}
