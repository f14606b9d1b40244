//! Case lifecycle manager: validated transitions over a locked store.
//!
//! All case mutation funnels through [`CaseStateMachine::transition`], which
//! serializes writers per case, enforces the transition table, appends the
//! audit record, and notifies listeners without blocking the transition.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{names, EventPublisher};
use crate::models::{Case, StateTransition};
use crate::state_machine::errors::{StateMachineError, StateMachineResult};
use crate::state_machine::persistence::{CaseRepository, PersistenceError};
use crate::state_machine::states::CaseState;

/// Callback invoked after a case enters a given state. Fire-and-notify:
/// runs on a spawned task, never blocks or fails the transition.
pub type StateListener = Arc<dyn Fn(Case) + Send + Sync>;

/// Thread-safe case lifecycle state machine
pub struct CaseStateMachine {
    repository: Arc<dyn CaseRepository>,
    event_publisher: EventPublisher,
    listeners: RwLock<HashMap<CaseState, Vec<StateListener>>>,
    case_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl CaseStateMachine {
    pub fn new(repository: Arc<dyn CaseRepository>, event_publisher: EventPublisher) -> Self {
        Self {
            repository,
            event_publisher,
            listeners: RwLock::new(HashMap::new()),
            case_locks: DashMap::new(),
        }
    }

    /// Register a new case in its initial state.
    pub async fn create_case(&self, case: Case) -> StateMachineResult<Case> {
        let snapshot = case.clone();
        self.repository.insert(case).await.map_err(|err| match err {
            PersistenceError::AlreadyExists { case_id } => {
                StateMachineError::AlreadyExists { case_id }
            }
            PersistenceError::NotFound { case_id } | PersistenceError::Conflict { case_id, .. } => {
                StateMachineError::ConcurrentModification { case_id }
            }
        })?;

        info!(
            case_id = %snapshot.case_id,
            case_type = %snapshot.case_type,
            priority = %snapshot.priority,
            "📋 Case created"
        );
        Ok(snapshot)
    }

    /// Pure read of the current case snapshot.
    pub async fn get_case(&self, case_id: Uuid) -> StateMachineResult<Case> {
        self.repository
            .get(case_id)
            .await
            .map(|(case, _)| case)
            .map_err(|_| StateMachineError::NotFound { case_id })
    }

    /// Attempt an atomic transition of the case to `to_state`.
    ///
    /// Read-modify-write guarded by a per-case lock; the edge must be in the
    /// transition table or the case is left untouched. Returns the updated
    /// case snapshot.
    pub async fn transition(
        &self,
        case_id: Uuid,
        to_state: CaseState,
        trigger: &str,
        actor: &str,
    ) -> StateMachineResult<Case> {
        let lock = self.lock_for(case_id);
        let _guard = lock.lock().await;

        let (mut case, version) = self
            .repository
            .get(case_id)
            .await
            .map_err(|_| StateMachineError::NotFound { case_id })?;

        let from_state = case.current_state;
        if !from_state.can_transition_to(to_state) {
            warn!(
                case_id = %case_id,
                from = %from_state,
                to = %to_state,
                trigger = trigger,
                "❌ Rejected invalid case transition"
            );
            return Err(StateMachineError::InvalidTransition {
                case_id,
                from: from_state,
                to: to_state,
            });
        }

        case.history
            .push(StateTransition::new(from_state, to_state, trigger, actor));
        case.current_state = to_state;

        self.repository
            .put(case.clone(), version)
            .await
            .map_err(|err| match err {
                PersistenceError::Conflict { case_id, .. } => {
                    StateMachineError::ConcurrentModification { case_id }
                }
                PersistenceError::NotFound { case_id } => StateMachineError::NotFound { case_id },
                PersistenceError::AlreadyExists { case_id } => {
                    StateMachineError::AlreadyExists { case_id }
                }
            })?;

        info!(
            case_id = %case_id,
            from = %from_state,
            to = %to_state,
            trigger = trigger,
            actor = actor,
            "🔄 Case transitioned"
        );

        self.event_publisher.publish(
            names::CASE_STATE_CHANGED,
            json!({
                "case_id": case_id,
                "from_state": from_state,
                "to_state": to_state,
                "trigger": trigger,
                "actor": actor,
            }),
        );
        self.notify_listeners(to_state, &case);

        Ok(case)
    }

    /// Register a callback fired whenever any case enters `state`.
    pub fn register_listener(&self, state: CaseState, listener: StateListener) {
        debug!(state = %state, "Registered state entry listener");
        self.listeners.write().entry(state).or_default().push(listener);
    }

    fn notify_listeners(&self, state: CaseState, case: &Case) {
        let callbacks: Vec<StateListener> = self
            .listeners
            .read()
            .get(&state)
            .map(|list| list.to_vec())
            .unwrap_or_default();

        for callback in callbacks {
            let snapshot = case.clone();
            tokio::spawn(async move {
                callback(snapshot);
            });
        }
    }

    fn lock_for(&self, case_id: Uuid) -> Arc<Mutex<()>> {
        self.case_locks
            .entry(case_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
