//! Error taxonomy of the workflow engine.
//!
//! Each failure class is its own type so callers can match on what they can
//! recover from: validation blocks creation, node errors feed the retry
//! policy, evaluation errors are fatal, conflicts leave state untouched and
//! store outages mean the current step was not committed.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{ExecutionStatus, InteractionStatus};
use agentflow_types::llm::LlmError;
use agentflow_types::workflow::WorkflowStatus;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A single problem found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Where the problem is, e.g. `nodes.classify.config.prompt` or `edges[3]`.
    pub location: String,
    pub message: String,
}

impl Violation {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// The definition is malformed. Lists every violation found, not just the first.
#[derive(Debug, Clone, Error)]
#[error("invalid workflow definition: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(location, message)],
        }
    }

    /// `Ok(())` when nothing was collected, otherwise the error.
    pub fn from_violations(violations: Vec<Violation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self { violations })
        }
    }
}

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Failure of a single tool call. Always returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("tool '{tool}' is not registered")]
    NotFound { tool: String },

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool '{tool}' timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("remote tool '{tool}' failed: {reason}")]
    RemoteFailure { tool: String, reason: String },

    /// An in-process tool ran and reported a failure.
    #[error("tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
}

impl ToolError {
    /// NotFound and InvalidArguments can never succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ToolError::NotFound { .. } | ToolError::InvalidArguments { .. }
        )
    }

    pub fn tool(&self) -> &str {
        match self {
            ToolError::NotFound { tool }
            | ToolError::InvalidArguments { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::RemoteFailure { tool, .. }
            | ToolError::Failed { tool, .. } => tool,
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationError
// ---------------------------------------------------------------------------

/// A guard expression could not be evaluated. Fatal to the execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("expression '{expression}' references undefined variable '{variable}'")]
    UndefinedVariable {
        expression: String,
        variable: String,
    },

    #[error("expression '{expression}' is malformed: {reason}")]
    Malformed { expression: String, reason: String },

    #[error("no outgoing edge of conditional node '{node_id}' matched")]
    NoBranchMatched { node_id: String },
}

// ---------------------------------------------------------------------------
// NodeError
// ---------------------------------------------------------------------------

/// A node handler failed.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("model provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("agent made {max} model calls without producing a final answer")]
    IterationLimit { max: u32 },

    #[error("node timed out after {0}s")]
    Timeout(u64),

    #[error("invalid node configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    /// Whether the retry policy may re-invoke the handler after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Tool(e) => e.is_retryable(),
            NodeError::Evaluation(_) | NodeError::Config(_) | NodeError::Cancelled => false,
            NodeError::Llm(LlmError::AuthenticationFailed)
            | NodeError::Llm(LlmError::NotConfigured(_))
            | NodeError::Llm(LlmError::InvalidRequest(_)) => false,
            NodeError::Llm(_)
            | NodeError::IterationLimit { .. }
            | NodeError::Timeout(_)
            | NodeError::Failed(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// InteractionConflictError
// ---------------------------------------------------------------------------

/// A respond call was duplicate or stale. State is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionConflictError {
    #[error("interaction {interaction_id} is already {status}")]
    NotPending {
        interaction_id: Uuid,
        status: InteractionStatus,
    },

    #[error("execution {execution_id} is {status}, not paused")]
    ExecutionNotPaused {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[error("interaction {interaction_id} does not belong to execution {execution_id}")]
    WrongExecution {
        execution_id: Uuid,
        interaction_id: Uuid,
    },

    #[error("execution {0} already has a pending interaction")]
    AlreadyPending(Uuid),
}

// ---------------------------------------------------------------------------
// StoreUnavailableError
// ---------------------------------------------------------------------------

/// The durable store rejected or could not complete a write. The step that
/// produced it is not committed.
#[derive(Debug, Clone, Error)]
#[error("store unavailable: {0}")]
pub struct StoreUnavailableError(pub String);

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by engine and service operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] InteractionConflictError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailableError),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("interaction {0} not found")]
    InteractionNotFound(Uuid),

    #[error("agent {0} not found")]
    AgentNotFound(Uuid),

    /// An active or paused workflow still names the agent.
    #[error("agent {id} is referenced by workflow {workflow_id}")]
    AgentInUse { id: Uuid, workflow_id: Uuid },

    /// The response does not conform to the interaction's `input_schema`.
    #[error("response to interaction {interaction_id} is invalid: {reason}")]
    InvalidResponse { interaction_id: Uuid, reason: String },

    #[error("workflow {id} is {status}, not active")]
    WorkflowNotActive { id: Uuid, status: WorkflowStatus },

    #[error("workflow {id} cannot move from {from} to {to}")]
    InvalidWorkflowTransition {
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("workflow {id} is referenced by {count} unfinished execution(s)")]
    WorkflowInUse { id: Uuid, count: u64 },

    #[error("execution {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("execution {0} is being advanced by another worker")]
    ExecutionBusy(Uuid),

    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        if e.is_unavailable() {
            EngineError::StoreUnavailable(StoreUnavailableError(e.to_string()))
        } else {
            EngineError::Repository(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_all_violations() {
        let err = ValidationError {
            violations: vec![
                Violation::new("nodes.a.config.prompt", "missing required field"),
                Violation::new("edges[1]", "target 'ghost' does not exist"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("nodes.a.config.prompt"), "got: {msg}");
        assert!(msg.contains("ghost"), "got: {msg}");
    }

    #[test]
    fn test_from_violations_empty_is_ok() {
        assert!(ValidationError::from_violations(vec![]).is_ok());
        assert!(ValidationError::from_violations(vec![Violation::new("x", "y")]).is_err());
    }

    #[test]
    fn test_tool_error_retry_classification() {
        let not_found = ToolError::NotFound { tool: "nope".into() };
        let timeout = ToolError::Timeout {
            tool: "slow".into(),
            timeout_secs: 5,
        };
        assert!(!not_found.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!NodeError::from(not_found).is_retryable());
        assert!(NodeError::from(timeout).is_retryable());
    }

    #[test]
    fn test_tool_error_serializes_with_kind() {
        let err = ToolError::InvalidArguments {
            tool: "calculator".into(),
            reason: "missing field `expression`".into(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "invalid_arguments");
        assert_eq!(value["tool"], "calculator");
    }

    #[test]
    fn test_evaluation_error_is_never_retried() {
        let err = NodeError::from(EvaluationError::UndefinedVariable {
            expression: "x > 1".into(),
            variable: "x".into(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_repository_error_mapping() {
        let unavailable: EngineError = RepositoryError::Connection("refused".into()).into();
        assert!(matches!(unavailable, EngineError::StoreUnavailable(_)));

        let conflict: EngineError = RepositoryError::Conflict("dup".into()).into();
        assert!(matches!(conflict, EngineError::Repository(RepositoryError::Conflict(_))));
    }
}
