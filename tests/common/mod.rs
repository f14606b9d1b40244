//! Shared helpers for integration tests: a fast-polling system build,
//! stub capability handlers, and state polling utilities.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use triage_core::config::TriageConfig;
use triage_core::models::RetryPolicy;
use triage_core::orchestration::{InstanceStatusView, OrchestrationSystem};
use triage_core::registry::{CapabilityHandler, HandlerError, HandlerResult};
use triage_core::state_machine::CaseState;

/// System tuned for fast tests: short poll timeout, no webhook.
pub fn test_system() -> OrchestrationSystem {
    let config = TriageConfig {
        worker_count: 4,
        queue_poll_timeout_ms: 50,
        lease_duration_ms: 5_000,
        ..TriageConfig::default()
    };
    OrchestrationSystem::build(&config)
}

/// Retry policy with millisecond-scale backoff for test speed.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 40,
        jitter_fraction: 0.0,
    }
}

pub struct SucceedHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CapabilityHandler for SucceedHandler {
    async fn invoke(&self, _payload: &Value) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"status": "success"}))
    }
}

pub struct TransientFailHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CapabilityHandler for TransientFailHandler {
    async fn invoke(&self, _payload: &Value) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Transient("simulated outage".to_string()))
    }
}

pub struct PermanentFailHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CapabilityHandler for PermanentFailHandler {
    async fn invoke(&self, _payload: &Value) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Permanent("rejected by policy".to_string()))
    }
}

pub struct SlowHandler {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CapabilityHandler for SlowHandler {
    async fn invoke(&self, _payload: &Value) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({"status": "success", "slow": true}))
    }
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Poll until the case reaches `target`, panicking on timeout with the last
/// observed snapshot for diagnosis.
pub async fn wait_for_state(
    system: &OrchestrationSystem,
    instance_id: Uuid,
    target: CaseState,
    timeout: Duration,
) -> InstanceStatusView {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = system
            .status(instance_id)
            .await
            .expect("instance status readable");
        if view.current_state == target {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {target}; last seen {} with steps {:?}",
            view.current_state,
            view.step_statuses
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every recorded transition must follow the table, chain contiguously from
/// PENDING, and no edge may appear twice.
pub fn assert_history_valid(view: &InstanceStatusView) {
    let mut previous = CaseState::Pending;
    let mut seen_edges = Vec::new();
    for transition in &view.history {
        assert_eq!(
            transition.from_state, previous,
            "history must chain contiguously"
        );
        assert!(
            transition.from_state.can_transition_to(transition.to_state),
            "edge {} -> {} not in transition table",
            transition.from_state,
            transition.to_state
        );
        let edge = (transition.from_state, transition.to_state);
        assert!(
            !seen_edges.contains(&edge),
            "duplicate edge {} -> {}",
            transition.from_state,
            transition.to_state
        );
        seen_edges.push(edge);
        previous = transition.to_state;
    }
    assert_eq!(previous, view.current_state);
}
