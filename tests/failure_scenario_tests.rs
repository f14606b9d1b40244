//! Failure-path tests: retry exhaustion, required-step cascade,
//! cancellation, backpressure, missing capabilities, and the lease-expiry
//! guard for crashed workers.

mod common;

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    counter, fast_retry, test_system, wait_for_state, PermanentFailHandler, SlowHandler,
    SucceedHandler, TransientFailHandler,
};
use triage_core::config::TriageConfig;
use triage_core::models::{CaseType, StepSpec, StepStatus, WorkflowDefinition};
use triage_core::orchestration::{CaseSubmission, OrchestrationSystem};
use triage_core::state_machine::CaseState;

#[tokio::test]
async fn test_retry_exhaustion_fails_case_after_exact_attempts() {
    let system = test_system();
    let calls = counter();
    system.register_capability(
        "flaky",
        Arc::new(TransientFailHandler { calls: Arc::clone(&calls) }),
    );
    system
        .register_definition(
            CaseType::CiFailure,
            WorkflowDefinition::new("ci-flaky", "1.0.0")
                .step(StepSpec::new("parse", "flaky").retry_policy(fast_retry(3))),
        )
        .unwrap();
    system.start();

    let receipt = system
        .submit(CaseSubmission::new(CaseType::CiFailure, json!({"log": "x"})))
        .await
        .unwrap();

    let view = wait_for_state(
        &system,
        receipt.instance_id,
        CaseState::Failed,
        Duration::from_secs(5),
    )
    .await;

    // Exactly max_attempts invocations, then a permanent step failure.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(view.step_statuses["parse"], StepStatus::Failed);

    // Exactly one FAILED edge in the audit log.
    let failed_edges = view
        .history
        .iter()
        .filter(|t| t.to_state == CaseState::Failed)
        .count();
    assert_eq!(failed_edges, 1);
    common::assert_history_valid(&view);

    // The exhausted task is retained in the dead-letter queue with its
    // final error.
    let dead = system.peek_dead_letter(10);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].step_id, "parse");
    assert_eq!(dead[0].attempt_count, 3);
    assert!(dead[0].last_error.is_some());

    system.shutdown().await;
}

#[tokio::test]
async fn test_required_step_failure_cascades_to_dependents() {
    let system = test_system();
    let upstream_calls = counter();
    let downstream_calls = counter();
    system.register_capability(
        "analyze",
        Arc::new(PermanentFailHandler { calls: Arc::clone(&upstream_calls) }),
    );
    system.register_capability(
        "remediate",
        Arc::new(SucceedHandler { calls: Arc::clone(&downstream_calls) }),
    );
    system
        .register_definition(
            CaseType::SecurityAlert,
            WorkflowDefinition::new("alert-cascade", "1.0.0")
                .step(StepSpec::new("analyze", "analyze"))
                .step(StepSpec::new("remediate", "remediate").depends_on(&["analyze"])),
        )
        .unwrap();
    system.start();

    let receipt = system
        .submit(CaseSubmission::new(CaseType::SecurityAlert, json!({"ip": "10.1.1.1"})))
        .await
        .unwrap();

    let view = wait_for_state(
        &system,
        receipt.instance_id,
        CaseState::Failed,
        Duration::from_secs(5),
    )
    .await;

    // Permanent failures are not retried.
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(view.step_statuses["analyze"], StepStatus::Failed);
    // The dependent never ran and never will.
    assert_eq!(view.step_statuses["remediate"], StepStatus::Skipped);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
    common::assert_history_valid(&view);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_before_completion_skips_all_steps() {
    let system = test_system();
    let calls = counter();
    system.register_capability(
        "slow-scan",
        Arc::new(SlowHandler {
            delay: Duration::from_millis(500),
            calls: Arc::clone(&calls),
        }),
    );
    system
        .register_definition(
            CaseType::SpamIncident,
            WorkflowDefinition::new("spam-slow", "1.0.0")
                .step(StepSpec::new("scan", "slow-scan"))
                .step(StepSpec::new("verdict", "slow-scan").depends_on(&["scan"])),
        )
        .unwrap();
    system.start();

    let receipt = system
        .submit(CaseSubmission::new(CaseType::SpamIncident, json!({"content": "spam?"})))
        .await
        .unwrap();

    let case = system.cancel(receipt.case_id).await.unwrap();
    assert_eq!(case.current_state, CaseState::Cancelled);

    let view = system.status(receipt.instance_id).await.unwrap();
    assert_eq!(view.current_state, CaseState::Cancelled);
    assert!(view
        .step_statuses
        .values()
        .all(|status| *status == StepStatus::Skipped));

    // An in-flight invocation may still finish; its result must be
    // discarded, not applied.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let after = system.status(receipt.instance_id).await.unwrap();
    assert_eq!(after.current_state, CaseState::Cancelled);
    common::assert_history_valid(&after);

    // Cancelling again is a no-op on a terminal case.
    let again = system.cancel(receipt.case_id).await.unwrap();
    assert_eq!(again.current_state, CaseState::Cancelled);

    system.shutdown().await;
}

#[tokio::test]
async fn test_missing_capability_fails_step_without_retries() {
    let system = test_system();
    system
        .register_definition(
            CaseType::CiFailure,
            WorkflowDefinition::new("ci-ghost", "1.0.0")
                .step(StepSpec::new("parse", "never-registered").retry_policy(fast_retry(5))),
        )
        .unwrap();
    system.start();

    let receipt = system
        .submit(CaseSubmission::new(CaseType::CiFailure, json!({"log": "x"})))
        .await
        .unwrap();

    let view = wait_for_state(
        &system,
        receipt.instance_id,
        CaseState::Failed,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(view.step_statuses["parse"], StepStatus::Failed);
    // Permanent dispatch failure: the task is acked, never dead-lettered.
    assert!(system.peek_dead_letter(10).is_empty());
    common::assert_history_valid(&view);

    system.shutdown().await;
}

#[tokio::test]
async fn test_saturated_queue_rejects_submission_without_partial_state() {
    let config = TriageConfig {
        queue_max_depth: 1,
        queue_poll_timeout_ms: 50,
        ..TriageConfig::default()
    };
    // Workers intentionally never started: the first submission's task
    // stays queued and holds the queue at its depth ceiling.
    let system = OrchestrationSystem::build(&config);
    system.register_capability("parse", Arc::new(SucceedHandler { calls: counter() }));
    system
        .register_definition(
            CaseType::CiFailure,
            WorkflowDefinition::new("ci-tight", "1.0.0").step(StepSpec::new("parse", "parse")),
        )
        .unwrap();

    let first = system
        .submit(CaseSubmission::new(CaseType::CiFailure, json!({"log": "a"})))
        .await
        .unwrap();

    let err = system
        .submit(CaseSubmission::new(CaseType::CiFailure, json!({"log": "b"})))
        .await
        .unwrap_err();
    assert!(err.is_backpressure());

    // The rejected submission left no live instance behind; the accepted
    // one is untouched.
    let view = system.status(first.instance_id).await.unwrap();
    assert_eq!(view.current_state, CaseState::Investigating);
    assert_eq!(system.queue_stats().total_tracked, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expired_lease_from_stuck_worker_fails_case() {
    // Lease far shorter than the handler runtime: the lease expires while
    // the invocation is still in flight, the reaper dead-letters the task
    // (single-attempt budget), and the monitor fails the case.
    let config = TriageConfig {
        worker_count: 2,
        queue_poll_timeout_ms: 50,
        lease_duration_ms: 100,
        ..TriageConfig::default()
    };
    let system = OrchestrationSystem::build(&config);
    let calls = counter();
    system.register_capability(
        "tar-pit",
        Arc::new(SlowHandler {
            delay: Duration::from_millis(600),
            calls: Arc::clone(&calls),
        }),
    );
    system
        .register_definition(
            CaseType::SecurityAlert,
            WorkflowDefinition::new("alert-stuck", "1.0.0").step(
                StepSpec::new("probe", "tar-pit")
                    .retry_policy(fast_retry(1))
                    .timeout_ms(5_000),
            ),
        )
        .unwrap();
    system.start();

    let receipt = system
        .submit(CaseSubmission::new(CaseType::SecurityAlert, json!({"host": "h1"})))
        .await
        .unwrap();

    let view = wait_for_state(
        &system,
        receipt.instance_id,
        CaseState::Failed,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(view.step_statuses["probe"], StepStatus::Failed);

    // The stuck invocation eventually returns; its late success must not
    // resurrect the case.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let after = system.status(receipt.instance_id).await.unwrap();
    assert_eq!(after.current_state, CaseState::Failed);
    common::assert_history_valid(&after);

    system.shutdown().await;
}
