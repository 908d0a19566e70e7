//! Retry decisions and exponential backoff for node invocations.
//!
//! Stateless: the engine asks whether a failed attempt may be retried and how
//! long to wait first.

use std::time::Duration;

use agentflow_types::workflow::RetryPolicy;

use crate::error::NodeError;

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` (1-based) failed
    /// with `error`.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &NodeError) -> bool {
        error.is_retryable() && attempt < policy.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// `initial_backoff_ms * backoff_multiplier^(attempt - 1)`, capped at
    /// `max_backoff_ms`.
    pub fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = policy.initial_backoff_ms as f64 * policy.backoff_multiplier.powi(exponent);
        let capped = delay.min(policy.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvaluationError, ToolError};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1_000,
        }
    }

    #[test]
    fn test_default_policy_never_retries() {
        let err = NodeError::Timeout(5);
        assert!(!RetryHandler::should_retry(&RetryPolicy::default(), 1, &err));
    }

    #[test]
    fn test_should_retry_within_limit() {
        let err = NodeError::Failed("boom".into());
        assert!(RetryHandler::should_retry(&policy(3), 1, &err));
        assert!(RetryHandler::should_retry(&policy(3), 2, &err));
        assert!(!RetryHandler::should_retry(&policy(3), 3, &err));
    }

    #[test]
    fn test_non_retryable_errors() {
        let eval = NodeError::Evaluation(EvaluationError::NoBranchMatched {
            node_id: "route".into(),
        });
        let missing = NodeError::Tool(ToolError::NotFound { tool: "x".into() });
        assert!(!RetryHandler::should_retry(&policy(5), 1, &eval));
        assert!(!RetryHandler::should_retry(&policy(5), 1, &missing));
        assert!(!RetryHandler::should_retry(&policy(5), 1, &NodeError::Cancelled));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy(10);
        assert_eq!(RetryHandler::backoff(&p, 1), Duration::from_millis(100));
        assert_eq!(RetryHandler::backoff(&p, 2), Duration::from_millis(200));
        assert_eq!(RetryHandler::backoff(&p, 3), Duration::from_millis(400));
        assert_eq!(RetryHandler::backoff(&p, 5), Duration::from_millis(1_000));
        assert_eq!(RetryHandler::backoff(&p, 60), Duration::from_millis(1_000));
    }
}
