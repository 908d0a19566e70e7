//! Interaction broker: human-in-the-loop pauses.
//!
//! Owns the interaction records of every execution and enforces that an
//! execution has at most one pending interaction. Responding is a
//! compare-and-set on the stored status, so a duplicate or stale response
//! is rejected without touching execution state. A response must conform to
//! the interaction's `input_schema` when it has one.

use std::sync::Arc;

use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{
    ExecutionState, Interaction, InteractionStatus, InterruptRequest,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, InteractionConflictError};
use crate::repository::WorkflowStore;
use crate::schema::SchemaValidator;

pub struct InteractionBroker<S: WorkflowStore> {
    store: Arc<S>,
}

impl<S: WorkflowStore> InteractionBroker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a pending interaction for a paused node.
    pub async fn open(
        &self,
        execution_id: Uuid,
        node_id: &str,
        request: &InterruptRequest,
    ) -> Result<Interaction, EngineError> {
        let now = Utc::now();
        let interaction = Interaction {
            id: Uuid::now_v7(),
            execution_id,
            node_id: node_id.to_string(),
            prompt: request.prompt.clone(),
            input_schema: request.input_schema.clone(),
            status: InteractionStatus::Pending,
            response: None,
            created_at: now,
            responded_at: None,
            timeout_at: request
                .timeout_secs
                .map(|secs| now + Duration::seconds(secs.min(u32::MAX as u64) as i64)),
        };

        match self.store.create_interaction(&interaction).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(InteractionConflictError::AlreadyPending(execution_id).into());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            execution_id = %execution_id,
            interaction_id = %interaction.id,
            node_id,
            timeout_at = ?interaction.timeout_at,
            "interaction opened"
        );
        Ok(interaction)
    }

    /// Mark `interaction_id` responded with `payload`.
    ///
    /// Fails with a conflict if the interaction belongs to another execution
    /// or is no longer pending, and with `InvalidResponse` if `payload` does
    /// not match the interaction's schema. Neither changes anything.
    pub async fn respond(
        &self,
        execution_id: Uuid,
        interaction_id: Uuid,
        payload: &Value,
    ) -> Result<Interaction, EngineError> {
        let interaction = self.get_for(execution_id, interaction_id).await?;
        if interaction.status != InteractionStatus::Pending {
            return Err(InteractionConflictError::NotPending {
                interaction_id,
                status: interaction.status,
            }
            .into());
        }
        if let Some(schema) = &interaction.input_schema {
            SchemaValidator::compile(schema)
                .and_then(|validator| validator.check(payload))
                .map_err(|reason| EngineError::InvalidResponse {
                    interaction_id,
                    reason,
                })?;
        }

        let now = Utc::now();
        if !self
            .store
            .respond_interaction(&interaction_id, payload, now)
            .await?
        {
            // Lost the race to another responder or the timeout sweep.
            let status = self
                .store
                .get_interaction(&interaction_id)
                .await?
                .map_or(InteractionStatus::Responded, |i| i.status);
            return Err(InteractionConflictError::NotPending {
                interaction_id,
                status,
            }
            .into());
        }

        tracing::info!(execution_id = %execution_id, interaction_id = %interaction_id, "interaction responded");
        Ok(Interaction {
            status: InteractionStatus::Responded,
            response: Some(payload.clone()),
            responded_at: Some(now),
            ..interaction
        })
    }

    /// Close the execution's pending interaction, if any, as `status`.
    pub async fn close_pending(
        &self,
        execution_id: Uuid,
        status: InteractionStatus,
    ) -> Result<Option<Uuid>, EngineError> {
        let pending = self
            .store
            .list_pending_interactions(Some(&execution_id))
            .await?;
        let mut closed = None;
        for interaction in pending {
            if self.store.close_interaction(&interaction.id, status).await? {
                tracing::debug!(
                    execution_id = %execution_id,
                    interaction_id = %interaction.id,
                    %status,
                    "interaction closed"
                );
                closed = Some(interaction.id);
            }
        }
        Ok(closed)
    }

    /// Pending interactions whose `timeout_at` is at or before `now`.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Interaction>, EngineError> {
        Ok(self
            .store
            .list_pending_interactions(None)
            .await?
            .into_iter()
            .filter(|i| i.timeout_at.is_some_and(|t| t <= now))
            .collect())
    }

    /// Mark one interaction timed out. `false` if it was no longer pending.
    pub async fn expire(&self, interaction_id: Uuid) -> Result<bool, EngineError> {
        Ok(self
            .store
            .close_interaction(&interaction_id, InteractionStatus::TimedOut)
            .await?)
    }

    /// Pending interactions of one execution, or of all executions.
    pub async fn pending(&self, execution_id: Option<Uuid>) -> Result<Vec<Interaction>, EngineError> {
        Ok(self
            .store
            .list_pending_interactions(execution_id.as_ref())
            .await?)
    }

    pub async fn list(&self, execution_id: Uuid) -> Result<Vec<Interaction>, EngineError> {
        Ok(self.store.list_interactions(&execution_id).await?)
    }

    async fn get_for(
        &self,
        execution_id: Uuid,
        interaction_id: Uuid,
    ) -> Result<Interaction, EngineError> {
        let interaction = self
            .store
            .get_interaction(&interaction_id)
            .await?
            .ok_or(EngineError::InteractionNotFound(interaction_id))?;
        if interaction.execution_id != execution_id {
            return Err(InteractionConflictError::WrongExecution {
                execution_id,
                interaction_id,
            }
            .into());
        }
        Ok(interaction)
    }
}

/// State delta for a response: objects merge key by key, anything else
/// lands under `<node_id>_response`.
pub fn response_delta(node_id: &str, payload: &Value) -> ExecutionState {
    match payload {
        Value::Object(fields) => fields.clone(),
        other => {
            let mut delta = ExecutionState::new();
            delta.insert(format!("{node_id}_response"), other.clone());
            delta
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use serde_json::json;

    fn request(timeout_secs: Option<u64>) -> InterruptRequest {
        InterruptRequest {
            prompt: "Approve?".into(),
            input_schema: None,
            timeout_secs,
        }
    }

    fn broker() -> InteractionBroker<InMemoryStore> {
        InteractionBroker::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_single_pending_per_execution() {
        let b = broker();
        let exec = Uuid::now_v7();
        b.open(exec, "review", &request(None)).await.unwrap();

        let err = b.open(exec, "review", &request(None)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict(InteractionConflictError::AlreadyPending(id)) if id == exec
        ));

        // A different execution is unaffected.
        b.open(Uuid::now_v7(), "review", &request(None)).await.unwrap();
        assert_eq!(b.pending(Some(exec)).await.unwrap().len(), 1);
        assert_eq!(b.pending(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_respond_conflicts() {
        let b = broker();
        let exec = Uuid::now_v7();
        let i = b.open(exec, "review", &request(None)).await.unwrap();

        let responded = b.respond(exec, i.id, &json!({ "approved": true })).await.unwrap();
        assert_eq!(responded.status, InteractionStatus::Responded);

        let err = b.respond(exec, i.id, &json!({ "approved": false })).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict(InteractionConflictError::NotPending {
                status: InteractionStatus::Responded,
                ..
            })
        ));
        let stored = b.list(exec).await.unwrap();
        assert_eq!(stored[0].response, Some(json!({ "approved": true })));
    }

    #[tokio::test]
    async fn test_response_must_match_input_schema() {
        let b = broker();
        let exec = Uuid::now_v7();
        let mut req = request(None);
        req.input_schema = Some(json!({
            "type": "object",
            "properties": {
                "decision": { "enum": ["approve", "reject"] },
                "note": { "type": "string" }
            },
            "required": ["decision"],
            "additionalProperties": false
        }));
        let i = b.open(exec, "review", &req).await.unwrap();

        let err = b
            .respond(exec, i.id, &json!({ "decision": "maybe", "extra": 1 }))
            .await
            .unwrap_err();
        match err {
            EngineError::InvalidResponse { interaction_id, reason } => {
                assert_eq!(interaction_id, i.id);
                assert!(reason.contains("maybe"), "{reason}");
                assert!(reason.contains("extra"), "{reason}");
            }
            other => panic!("expected InvalidResponse, got {other}"),
        }
        let stored = b.list(exec).await.unwrap();
        assert_eq!(stored[0].status, InteractionStatus::Pending);
        assert!(stored[0].response.is_none());

        let ok = b.respond(exec, i.id, &json!({ "decision": "approve" })).await.unwrap();
        assert_eq!(ok.status, InteractionStatus::Responded);
    }

    #[tokio::test]
    async fn test_respond_wrong_execution() {
        let b = broker();
        let i = b.open(Uuid::now_v7(), "review", &request(None)).await.unwrap();
        let err = b.respond(Uuid::now_v7(), i.id, &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict(InteractionConflictError::WrongExecution { .. })
        ));
    }

    #[tokio::test]
    async fn test_respond_unknown_interaction() {
        let b = broker();
        let err = b.respond(Uuid::now_v7(), Uuid::now_v7(), &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::InteractionNotFound(_)));
    }

    #[tokio::test]
    async fn test_close_pending_then_respond_fails() {
        let b = broker();
        let exec = Uuid::now_v7();
        let i = b.open(exec, "review", &request(None)).await.unwrap();

        let closed = b.close_pending(exec, InteractionStatus::Cancelled).await.unwrap();
        assert_eq!(closed, Some(i.id));
        assert!(b.close_pending(exec, InteractionStatus::Cancelled).await.unwrap().is_none());

        let err = b.respond(exec, i.id, &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict(InteractionConflictError::NotPending {
                status: InteractionStatus::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_overdue_and_expire() {
        let b = broker();
        let exec = Uuid::now_v7();
        let timed = b.open(exec, "review", &request(Some(60))).await.unwrap();
        b.open(Uuid::now_v7(), "review", &request(None)).await.unwrap();

        assert!(b.overdue(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + Duration::seconds(61);
        let overdue = b.overdue(later).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, timed.id);

        assert!(b.expire(timed.id).await.unwrap());
        assert!(!b.expire(timed.id).await.unwrap());
        assert!(b.overdue(later).await.unwrap().is_empty());
    }

    #[test]
    fn test_response_delta() {
        let merged = response_delta("review", &json!({ "approved": true }));
        assert_eq!(merged["approved"], true);

        let wrapped = response_delta("review", &json!("yes"));
        assert_eq!(wrapped["review_response"], "yes");
    }
}
