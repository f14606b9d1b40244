//! Queued unit of work: one execution attempt of a workflow step.
//!
//! The serialized form doubles as the wire envelope a durable queue store
//! would persist, versioned by an explicit `schema_version` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::case::CasePriority;
use crate::models::workflow::RetryPolicy;

/// Wire envelope schema version
pub const TASK_SCHEMA_VERSION: u32 = 1;

/// Queue-side task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in a priority tier or delayed behind `visible_after`
    Queued,
    /// Leased by a worker; redelivered if the lease expires
    Leased,
    /// Acked, retained for metadata reads only
    Done,
    /// Retries exhausted; retained with full payload for manual replay
    DeadLettered,
}

/// One queued execution attempt of a workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub schema_version: u32,
    /// Unique id, also the idempotent-dedup key for completion reports
    pub task_id: Uuid,
    pub instance_id: Uuid,
    pub step_id: String,
    /// Capability the worker resolves through the service registry
    pub capability: String,
    pub priority: CasePriority,
    /// Completed delivery attempts so far (0 before first dequeue)
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Not delivered before this instant (backoff / scheduled delay)
    pub visible_after: DateTime<Utc>,
    pub payload: Value,
    pub status: TaskStatus,
    pub retry_policy: RetryPolicy,
    /// Per-invocation timeout the worker enforces
    pub timeout_ms: u64,
    /// Tracing id propagated from the owning case
    pub correlation_id: Uuid,
    /// Final error recorded when the task is dead-lettered
    pub last_error: Option<String>,
}

impl QueuedTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance_id: Uuid,
        step_id: impl Into<String>,
        capability: impl Into<String>,
        priority: CasePriority,
        payload: Value,
        retry_policy: RetryPolicy,
        timeout_ms: u64,
        correlation_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: TASK_SCHEMA_VERSION,
            task_id: Uuid::new_v4(),
            instance_id,
            step_id: step_id.into(),
            capability: capability.into(),
            priority,
            attempt_count: 0,
            enqueued_at: now,
            visible_after: now,
            payload,
            status: TaskStatus::Queued,
            retry_policy,
            timeout_ms,
            correlation_id,
            last_error: None,
        }
    }

    /// Whether another delivery would exceed the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.attempt_count >= self.retry_policy.max_attempts
    }

    /// Milliseconds the task has existed.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.enqueued_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> QueuedTask {
        QueuedTask::new(
            Uuid::new_v4(),
            "classify",
            "spam-classify",
            CasePriority::Normal,
            json!({"content": "buy now"}),
            RetryPolicy::default(),
            5_000,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_new_task_is_immediately_visible() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempt_count, 0);
        assert!(task.visible_after <= Utc::now());
        assert!(!task.retries_exhausted());
    }

    #[test]
    fn test_exhaustion_threshold() {
        let mut task = sample_task();
        task.attempt_count = task.retry_policy.max_attempts;
        assert!(task.retries_exhausted());
    }

    #[test]
    fn test_wire_envelope_carries_schema_version() {
        let task = sample_task();
        let wire = serde_json::to_value(&task).unwrap();
        assert_eq!(wire["schema_version"], TASK_SCHEMA_VERSION);
        assert_eq!(wire["step_id"], "classify");
        assert_eq!(wire["capability"], "spam-classify");

        let decoded: QueuedTask = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded.task_id, task.task_id);
    }
}
