use uuid::Uuid;

use crate::state_machine::states::CaseState;

/// Errors surfaced by the case lifecycle state machine
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// The requested edge is not in the transition table; case state is
    /// left unchanged.
    #[error("Invalid transition {from} -> {to} for case {case_id}")]
    InvalidTransition {
        case_id: Uuid,
        from: CaseState,
        to: CaseState,
    },

    #[error("Case {case_id} not found")]
    NotFound { case_id: Uuid },

    /// Another actor mutated the case between read and write; retry with a
    /// fresh read.
    #[error("Concurrent modification of case {case_id}")]
    ConcurrentModification { case_id: Uuid },

    #[error("Case {case_id} already exists")]
    AlreadyExists { case_id: Uuid },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
