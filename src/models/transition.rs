use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::states::CaseState;

/// Immutable audit record of one case lifecycle transition.
///
/// Appended to `Case::history` by the state machine; never mutated or
/// deleted, and retained after the case reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: CaseState,
    pub to_state: CaseState,
    pub timestamp: DateTime<Utc>,
    /// Event name that caused the transition (e.g. "workflow_submitted")
    pub trigger: String,
    /// Worker id or "system"
    pub actor: String,
}

impl StateTransition {
    pub fn new(
        from_state: CaseState,
        to_state: CaseState,
        trigger: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            timestamp: Utc::now(),
            trigger: trigger.into(),
            actor: actor.into(),
        }
    }
}
