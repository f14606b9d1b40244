use uuid::Uuid;

use crate::models::workflow::WorkflowValidationError;
use crate::models::CaseType;
use crate::queue::QueueError;
use crate::state_machine::StateMachineError;

/// Errors surfaced by the workflow orchestrator
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// No workflow definition is bound to the submitted case type
    #[error("No workflow definition registered for case type '{case_type}'")]
    UnknownCaseType { case_type: CaseType },

    /// Submission payload does not satisfy the bound definition
    #[error("Payload for case type '{case_type}' is missing required fields: {missing:?}")]
    PayloadValidation {
        case_type: CaseType,
        missing: Vec<String>,
    },

    #[error("Workflow instance {instance_id} not found")]
    InstanceNotFound { instance_id: Uuid },

    #[error("No workflow instance bound to case {case_id}")]
    CaseNotBound { case_id: Uuid },

    #[error(transparent)]
    Definition(#[from] WorkflowValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

impl OrchestrationError {
    /// Backpressure errors are surfaced to submitters as 429/503-class
    /// failures rather than generic internal errors.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Queue(QueueError::CapacityExceeded { .. }))
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
