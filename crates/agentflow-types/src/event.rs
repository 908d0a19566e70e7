//! Event types for the AgentFlow engine event bus.
//!
//! `WorkflowEvent` is broadcast on every execution lifecycle transition.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while executions advance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
    },

    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        attempt: u32,
    },

    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    /// A step was committed as checkpoint `sequence`.
    CheckpointCommitted {
        execution_id: Uuid,
        node_id: String,
        sequence: u64,
    },

    ExecutionPaused {
        execution_id: Uuid,
        interaction_id: Uuid,
        node_id: String,
    },

    InteractionResponded {
        execution_id: Uuid,
        interaction_id: Uuid,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        duration_ms: Option<i64>,
    },

    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },

    ExecutionCancelled {
        execution_id: Uuid,
        reason: String,
    },
}

impl WorkflowEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::NodeStarted { execution_id, .. }
            | WorkflowEvent::NodeFailed { execution_id, .. }
            | WorkflowEvent::CheckpointCommitted { execution_id, .. }
            | WorkflowEvent::ExecutionPaused { execution_id, .. }
            | WorkflowEvent::InteractionResponded { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_committed_serde_roundtrip() {
        let id = Uuid::now_v7();
        let event = WorkflowEvent::CheckpointCommitted {
            execution_id: id,
            node_id: "classify".to_string(),
            sequence: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"checkpoint_committed\""));
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WorkflowEvent::CheckpointCommitted { sequence: 2, .. }));
        assert_eq!(parsed.execution_id(), id);
    }

    #[test]
    fn test_node_failed_carries_retry_flag() {
        let event = WorkflowEvent::NodeFailed {
            execution_id: Uuid::now_v7(),
            node_id: "fetch".to_string(),
            attempt: 1,
            error: "timeout".to_string(),
            will_retry: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_failed");
        assert_eq!(json["will_retry"], true);
    }
}
