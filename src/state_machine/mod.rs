// State machine module for case lifecycle management
//
// Owns the valid states, the transition table, and the per-case mutation
// log. All case mutation flows through the locked transition contract here.

pub mod case_state_machine;
pub mod errors;
pub mod persistence;
pub mod states;

// Re-export main types for convenient access
pub use case_state_machine::{CaseStateMachine, StateListener};
pub use errors::{StateMachineError, StateMachineResult};
pub use persistence::{CaseRepository, InMemoryCaseRepository, PersistenceError};
pub use states::CaseState;

#[cfg(test)]
mod transition_table_properties {
    use super::states::CaseState;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = CaseState> {
        prop_oneof![
            Just(CaseState::Pending),
            Just(CaseState::Investigating),
            Just(CaseState::Validating),
            Just(CaseState::Remediating),
            Just(CaseState::Resolved),
            Just(CaseState::Failed),
            Just(CaseState::Cancelled),
        ]
    }

    proptest! {
        // Terminal states admit no outgoing edges at all.
        #[test]
        fn terminal_states_admit_no_edges(from in any_state(), to in any_state()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        // No edge ever moves a case backwards along the forward chain.
        #[test]
        fn edges_never_regress_progress(from in any_state(), to in any_state()) {
            if from.can_transition_to(to) {
                prop_assert!(to.progress_rank() >= from.progress_rank());
            }
        }

        // Self-loops are never valid.
        #[test]
        fn no_self_loops(state in any_state()) {
            prop_assert!(!state.can_transition_to(state));
        }

        // Every non-terminal state can be cancelled.
        #[test]
        fn non_terminal_states_are_cancellable(state in any_state()) {
            if !state.is_terminal() {
                prop_assert!(state.can_transition_to(CaseState::Cancelled));
            }
        }
    }
}
