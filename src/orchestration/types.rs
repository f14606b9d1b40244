use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{CasePriority, CaseType, StateTransition, StepStatus};
use crate::state_machine::CaseState;

/// A request to open a case and run its bound workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSubmission {
    pub case_type: CaseType,
    pub payload: Value,
    #[serde(default)]
    pub priority: Option<CasePriority>,
}

impl CaseSubmission {
    pub fn new(case_type: CaseType, payload: Value) -> Self {
        Self {
            case_type,
            payload,
            priority: None,
        }
    }

    pub fn priority(mut self, priority: CasePriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Identifiers returned from a successful submission
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub instance_id: Uuid,
    pub case_id: Uuid,
}

/// Terminal outcome of one step execution attempt, reported by a worker
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Succeeded(Value),
    /// Permanent failures and exhausted retries both land here; transient
    /// failures stay inside the queue's retry loop and never surface.
    Failed { error: String },
}

/// Completion report delivered by a worker after a task reaches a terminal
/// queue disposition (acked or dead-lettered).
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub task_id: Uuid,
    pub instance_id: Uuid,
    pub step_id: String,
    pub worker_id: String,
    pub outcome: StepOutcome,
}

/// Read-model snapshot served to the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatusView {
    pub instance_id: Uuid,
    pub case_id: Uuid,
    pub current_state: CaseState,
    pub step_statuses: HashMap<String, StepStatus>,
    pub history: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
