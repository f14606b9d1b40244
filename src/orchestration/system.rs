//! # Orchestration System
//!
//! Wires the full stack together for an embedded deployment: case
//! repository, state machine, task queue, registries, orchestrator, worker
//! pool, dead-letter monitor, and optional completion webhook. This is the
//! single entry point the request surface (and the integration tests) build
//! against.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::config::TriageConfig;
use crate::events::{names, EventPublisher};
use crate::models::workflow::WorkflowValidationError;
use crate::models::{Case, CaseType, QueuedTask, WorkflowDefinition};
use crate::orchestration::definition_registry::DefinitionRegistry;
use crate::orchestration::errors::OrchestrationResult;
use crate::orchestration::orchestrator::WorkflowOrchestrator;
use crate::orchestration::types::{
    CaseSubmission, CompletionReport, InstanceStatusView, StepOutcome, SubmitReceipt,
};
use crate::orchestration::webhook::CompletionWebhook;
use crate::orchestration::worker::WorkerPool;
use crate::queue::{QueueResult, QueueStats, TaskQueue};
use crate::registry::{CapabilityHandler, CapabilityRegistry};
use crate::state_machine::{CaseState, CaseStateMachine, InMemoryCaseRepository};

/// Fully-wired orchestration core.
pub struct OrchestrationSystem {
    pub events: EventPublisher,
    pub state_machine: Arc<CaseStateMachine>,
    pub queue: Arc<TaskQueue>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub definitions: Arc<DefinitionRegistry>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    workers: WorkerPool,
    dead_letter_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestrationSystem {
    /// Build every component from configuration. Workers are not started
    /// until [`OrchestrationSystem::start`].
    pub fn build(config: &TriageConfig) -> Self {
        let events = EventPublisher::new(config.event_channel_capacity);
        let state_machine = Arc::new(CaseStateMachine::new(
            Arc::new(InMemoryCaseRepository::new()),
            events.clone(),
        ));
        let queue = Arc::new(TaskQueue::new(config.queue_settings(), events.clone()));
        let capabilities = Arc::new(CapabilityRegistry::new());
        let definitions = Arc::new(DefinitionRegistry::new());

        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            Arc::clone(&definitions),
            Arc::clone(&capabilities),
            Arc::clone(&state_machine),
            Arc::clone(&queue),
            events.clone(),
        ));

        if let Some(url) = &config.webhook_url {
            let webhook = CompletionWebhook::new(
                url.clone(),
                config.webhook_max_attempts,
                config.webhook_timeout(),
            );
            for state in [CaseState::Resolved, CaseState::Failed, CaseState::Cancelled] {
                let webhook = webhook.clone();
                state_machine.register_listener(
                    state,
                    Arc::new(move |case| {
                        let webhook = webhook.clone();
                        tokio::spawn(async move {
                            webhook.deliver(&case).await;
                        });
                    }),
                );
            }
        }

        let workers = WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&capabilities),
            Arc::clone(&orchestrator),
            config.worker_count,
            config.lease_duration(),
        );

        Self {
            events,
            state_machine,
            queue,
            capabilities,
            definitions,
            orchestrator,
            workers,
            dead_letter_monitor: Mutex::new(None),
        }
    }

    /// Start the worker pool and the dead-letter monitor.
    pub fn start(&self) {
        self.workers.start();
        let mut monitor = self.dead_letter_monitor.lock();
        if monitor.is_none() {
            *monitor = Some(self.spawn_dead_letter_monitor());
        }
    }

    /// Stop the worker pool, letting in-flight steps finish.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
        if let Some(handle) = self.dead_letter_monitor.lock().take() {
            handle.abort();
        }
    }

    /// Turn dead-letter events into permanent step failures.
    ///
    /// The worker reports exhaustion for tasks it nacked itself, but a task
    /// dead-lettered by lease expiry (worker crash) has no reporter; without
    /// this monitor its instance would wait forever.
    fn spawn_dead_letter_monitor(&self) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            skipped = skipped,
                            "Dead-letter monitor lagged behind the event stream"
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if event.name != names::TASK_DEAD_LETTERED {
                    continue;
                }

                let parse_uuid = |field: &str| {
                    event
                        .context
                        .get(field)
                        .and_then(Value::as_str)
                        .and_then(|raw| Uuid::parse_str(raw).ok())
                };
                let (Some(task_id), Some(instance_id), Some(step_id)) = (
                    parse_uuid("task_id"),
                    parse_uuid("instance_id"),
                    event.context.get("step_id").and_then(Value::as_str),
                ) else {
                    warn!(context = %event.context, "Malformed dead-letter event skipped");
                    continue;
                };

                let error = event
                    .context
                    .get("error")
                    .or_else(|| event.context.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("retries exhausted");

                let report = CompletionReport {
                    task_id,
                    instance_id,
                    step_id: step_id.to_string(),
                    worker_id: "dead-letter-monitor".to_string(),
                    outcome: StepOutcome::Failed {
                        error: format!("retries exhausted: {error}"),
                    },
                };
                if let Err(err) = orchestrator.handle_report(report).await {
                    warn!(
                        task_id = %task_id,
                        error = %err,
                        "Dead-letter monitor could not apply failure report"
                    );
                }
            }
        })
    }

    pub fn register_capability(&self, name: impl Into<String>, handler: Arc<dyn CapabilityHandler>) {
        self.capabilities.register(name, handler);
    }

    pub fn register_definition(
        &self,
        case_type: CaseType,
        definition: WorkflowDefinition,
    ) -> Result<(), WorkflowValidationError> {
        self.definitions.register(case_type, definition).map(|_| ())
    }

    pub async fn submit(&self, submission: CaseSubmission) -> OrchestrationResult<SubmitReceipt> {
        self.orchestrator.submit(submission).await
    }

    pub async fn status(&self, instance_id: Uuid) -> OrchestrationResult<InstanceStatusView> {
        self.orchestrator.status(instance_id).await
    }

    pub async fn cancel(&self, case_id: Uuid) -> OrchestrationResult<Case> {
        self.orchestrator.cancel(case_id).await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn peek_dead_letter(&self, limit: usize) -> Vec<QueuedTask> {
        self.queue.peek_dead_letter(limit)
    }

    pub fn replay_dead_letter(&self, task_id: Uuid) -> QueueResult<()> {
        self.queue.replay_dead_letter(task_id)
    }
}
