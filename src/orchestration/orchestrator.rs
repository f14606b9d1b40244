//! # Workflow Orchestrator
//!
//! Composes the definition registry, capability registry, state machine,
//! and task queue: accepts case submissions, creates workflow instances,
//! dispatches ready steps as queue tasks, and advances instances as
//! completion reports arrive.
//!
//! Step-advancement for a given case is serialized by a per-case async
//! lock; independent cases advance fully in parallel. Duplicate completion
//! reports (at-least-once delivery) are no-ops: a processed-task set and
//! the step's terminal status both guard re-application.

use dashmap::{DashMap, DashSet};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{names, EventPublisher};
use crate::models::{Case, QueuedTask, StepSpec, StepStatus, WorkflowDefinition, WorkflowInstance};
use crate::orchestration::definition_registry::DefinitionRegistry;
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::types::{
    CaseSubmission, CompletionReport, InstanceStatusView, StepOutcome, SubmitReceipt,
};
use crate::registry::CapabilityRegistry;
use crate::queue::TaskQueue;
use crate::state_machine::{CaseState, CaseStateMachine};

/// Coordinates DAG workflow execution across cases.
pub struct WorkflowOrchestrator {
    definitions: Arc<DefinitionRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    state_machine: Arc<CaseStateMachine>,
    queue: Arc<TaskQueue>,
    events: EventPublisher,
    instances: DashMap<Uuid, WorkflowInstance>,
    /// case_id -> instance_id
    case_index: DashMap<Uuid, Uuid>,
    /// Definition pinned per instance at submit time, immune to later
    /// re-registration for the case type
    bound_definitions: DashMap<Uuid, Arc<WorkflowDefinition>>,
    /// Task ids whose completion reports have been applied
    processed_tasks: DashSet<Uuid>,
    /// Per-case advancement locks
    advancement_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        definitions: Arc<DefinitionRegistry>,
        capabilities: Arc<CapabilityRegistry>,
        state_machine: Arc<CaseStateMachine>,
        queue: Arc<TaskQueue>,
        events: EventPublisher,
    ) -> Self {
        Self {
            definitions,
            capabilities,
            state_machine,
            queue,
            events,
            instances: DashMap::new(),
            case_index: DashMap::new(),
            bound_definitions: DashMap::new(),
            processed_tasks: DashSet::new(),
            advancement_locks: DashMap::new(),
        }
    }

    /// Open a case and start its bound workflow.
    ///
    /// Validates the payload against the bound definition, creates the case
    /// and instance, enqueues every dependency-free step, and moves the
    /// case out of `PENDING`. Queue saturation fails the submission with no
    /// partial enqueue left behind.
    pub async fn submit(&self, submission: CaseSubmission) -> OrchestrationResult<SubmitReceipt> {
        let definition = self
            .definitions
            .resolve(submission.case_type)
            .ok_or(OrchestrationError::UnknownCaseType {
                case_type: submission.case_type,
            })?;

        self.validate_payload(&definition, &submission)?;

        let case = Case::new(
            submission.case_type,
            submission.payload,
            submission.priority.unwrap_or_default(),
        );
        let case = self.state_machine.create_case(case).await?;
        let case_id = case.case_id;

        let instance = WorkflowInstance::new(case_id, &definition);
        let instance_id = instance.instance_id;
        self.instances.insert(instance_id, instance);
        self.case_index.insert(case_id, instance_id);
        self.bound_definitions
            .insert(instance_id, Arc::clone(&definition));

        let lock = self.advancement_lock(case_id);
        let _guard = lock.lock().await;

        let dispatched = {
            let mut instance = self
                .instances
                .get_mut(&instance_id)
                .ok_or(OrchestrationError::InstanceNotFound { instance_id })?;
            self.dispatch_ready_steps(&definition, &mut instance, &case)
        };

        match dispatched {
            Ok(dispatched) => {
                self.state_machine
                    .transition(case_id, CaseState::Investigating, "workflow_submitted", "system")
                    .await?;
                self.advance_phase(case_id, &definition, &dispatched).await?;

                info!(
                    case_id = %case_id,
                    instance_id = %instance_id,
                    definition_id = %definition.definition_id,
                    ready_steps = dispatched.len(),
                    "🎬 Workflow instance started"
                );
                Ok(SubmitReceipt {
                    instance_id,
                    case_id,
                })
            }
            Err(err) => {
                // No partial enqueue: withdraw anything queued and retire
                // the half-created case before surfacing the error.
                self.queue.withdraw_instance(instance_id);
                let _ = self
                    .state_machine
                    .transition(case_id, CaseState::Cancelled, "submit_rejected", "system")
                    .await;
                self.instances.remove(&instance_id);
                self.case_index.remove(&case_id);
                self.bound_definitions.remove(&instance_id);
                Err(err)
            }
        }
    }

    /// Record that a worker began executing a step (best-effort visibility;
    /// never blocks execution).
    pub fn note_step_started(&self, instance_id: Uuid, step_id: &str) {
        if let Some(mut instance) = self.instances.get_mut(&instance_id) {
            if instance.status_of(step_id) == Some(StepStatus::Ready) {
                instance
                    .step_statuses
                    .insert(step_id.to_string(), StepStatus::Running);
            }
        }
    }

    /// Apply a step completion report: the core advancement algorithm.
    pub async fn handle_report(&self, report: CompletionReport) -> OrchestrationResult<()> {
        if self.processed_tasks.contains(&report.task_id) {
            debug!(
                task_id = %report.task_id,
                step_id = %report.step_id,
                "Duplicate completion report ignored"
            );
            return Ok(());
        }

        let Some(case_id) = self
            .instances
            .get(&report.instance_id)
            .map(|instance| instance.case_id)
        else {
            warn!(
                instance_id = %report.instance_id,
                task_id = %report.task_id,
                "Completion report for unknown instance discarded"
            );
            return Ok(());
        };

        let lock = self.advancement_lock(case_id);
        let _guard = lock.lock().await;

        let case = self.state_machine.get_case(case_id).await?;
        if case.is_terminal() {
            info!(
                case_id = %case_id,
                step_id = %report.step_id,
                state = %case.current_state,
                "🗑️ Result for terminal case discarded"
            );
            return Ok(());
        }

        let definition = self
            .bound_definitions
            .get(&report.instance_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or(OrchestrationError::InstanceNotFound {
                instance_id: report.instance_id,
            })?;

        // Mutate the instance synchronously under the advancement lock,
        // deferring all state machine calls until the borrow is released.
        let (dispatched, finalize, failure) = {
            let mut instance = self.instances.get_mut(&report.instance_id).ok_or(
                OrchestrationError::InstanceNotFound {
                    instance_id: report.instance_id,
                },
            )?;

            if instance.completed_at.is_some() {
                debug!(
                    instance_id = %report.instance_id,
                    "Report against completed instance ignored"
                );
                return Ok(());
            }

            let current = instance.status_of(&report.step_id);
            if !matches!(current, Some(StepStatus::Ready | StepStatus::Running)) {
                debug!(
                    step_id = %report.step_id,
                    status = ?current,
                    "Report against non-active step ignored"
                );
                return Ok(());
            }

            match report.outcome.clone() {
                StepOutcome::Succeeded(result) => {
                    instance
                        .step_statuses
                        .insert(report.step_id.clone(), StepStatus::Succeeded);
                    instance
                        .step_results
                        .insert(report.step_id.clone(), result);
                    debug!(
                        instance_id = %report.instance_id,
                        step_id = %report.step_id,
                        "✅ Step succeeded"
                    );

                    match self.dispatch_ready_steps(&definition, &mut instance, &case) {
                        Ok(dispatched) => {
                            let finalize = instance.all_steps_terminal();
                            (dispatched, finalize, None)
                        }
                        Err(err) => {
                            let reason = format!("step dispatch failed: {err}");
                            Self::fail_instance(&mut instance, &report.step_id, StepStatus::Succeeded);
                            (Vec::new(), false, Some(reason))
                        }
                    }
                }
                StepOutcome::Failed { error } => {
                    let required = definition
                        .get_step(&report.step_id)
                        .map_or(true, |spec| spec.required);

                    if required {
                        warn!(
                            instance_id = %report.instance_id,
                            step_id = %report.step_id,
                            error = %error,
                            "🔴 Required step failed, cascading instance"
                        );
                        Self::fail_instance(&mut instance, &report.step_id, StepStatus::Failed);
                        (Vec::new(), false, Some(error))
                    } else {
                        info!(
                            instance_id = %report.instance_id,
                            step_id = %report.step_id,
                            error = %error,
                            "⚪ Optional step failed, skipping"
                        );
                        instance
                            .step_statuses
                            .insert(report.step_id.clone(), StepStatus::Skipped);
                        match self.dispatch_ready_steps(&definition, &mut instance, &case) {
                            Ok(dispatched) => {
                                let finalize = instance.all_steps_terminal();
                                (dispatched, finalize, None)
                            }
                            Err(err) => {
                                let reason = format!("step dispatch failed: {err}");
                                Self::fail_instance(&mut instance, &report.step_id, StepStatus::Skipped);
                                (Vec::new(), false, Some(reason))
                            }
                        }
                    }
                }
            }
        };

        if let Some(error) = failure {
            self.queue.withdraw_instance(report.instance_id);
            self.state_machine
                .transition(
                    case_id,
                    CaseState::Failed,
                    &format!("step_failed:{}", report.step_id),
                    &report.worker_id,
                )
                .await?;
            self.events.publish(
                names::INSTANCE_COMPLETED,
                json!({
                    "instance_id": report.instance_id,
                    "case_id": case_id,
                    "outcome": "failed",
                    "failed_step": report.step_id,
                    "error": error,
                }),
            );
            self.processed_tasks.insert(report.task_id);
            return Ok(());
        }

        self.advance_phase(case_id, &definition, &dispatched).await?;

        if finalize {
            self.finalize_instance(case_id, report.instance_id, &definition)
                .await?;
        }

        self.processed_tasks.insert(report.task_id);
        Ok(())
    }

    /// Cancel a case: skip all non-terminal steps, withdraw queued tasks,
    /// and drive the case to `CANCELLED`. Cancelling an already-terminal
    /// case is a no-op returning the current snapshot.
    pub async fn cancel(&self, case_id: Uuid) -> OrchestrationResult<Case> {
        let instance_id = *self
            .case_index
            .get(&case_id)
            .ok_or(OrchestrationError::CaseNotBound { case_id })?;

        let lock = self.advancement_lock(case_id);
        let _guard = lock.lock().await;

        let case = self.state_machine.get_case(case_id).await?;
        if case.is_terminal() {
            return Ok(case);
        }

        if let Some(mut instance) = self.instances.get_mut(&instance_id) {
            for step_id in instance.unstarted_steps() {
                instance.step_statuses.insert(step_id, StepStatus::Skipped);
            }
            instance.completed_at = Some(chrono::Utc::now());
        }

        let withdrawn = self.queue.withdraw_instance(instance_id);
        let case = self
            .state_machine
            .transition(case_id, CaseState::Cancelled, "cancel_requested", "operator")
            .await?;

        info!(
            case_id = %case_id,
            instance_id = %instance_id,
            withdrawn_tasks = withdrawn,
            "🛑 Case cancelled"
        );
        self.events.publish(
            names::INSTANCE_COMPLETED,
            json!({
                "instance_id": instance_id,
                "case_id": case_id,
                "outcome": "cancelled",
            }),
        );
        Ok(case)
    }

    /// Status read-model for one workflow instance.
    pub async fn status(&self, instance_id: Uuid) -> OrchestrationResult<InstanceStatusView> {
        let instance = self
            .instances
            .get(&instance_id)
            .map(|entry| entry.clone())
            .ok_or(OrchestrationError::InstanceNotFound { instance_id })?;
        let case = self.state_machine.get_case(instance.case_id).await?;

        Ok(InstanceStatusView {
            instance_id,
            case_id: instance.case_id,
            current_state: case.current_state,
            step_statuses: instance.step_statuses,
            history: case.history,
            started_at: instance.started_at,
            completed_at: instance.completed_at,
        })
    }

    fn validate_payload(
        &self,
        definition: &WorkflowDefinition,
        submission: &CaseSubmission,
    ) -> OrchestrationResult<()> {
        if definition.required_payload_fields.is_empty() {
            return Ok(());
        }

        let missing: Vec<String> = match submission.payload.as_object() {
            Some(fields) => definition
                .required_payload_fields
                .iter()
                .filter(|field| !fields.contains_key(*field))
                .cloned()
                .collect(),
            None => definition.required_payload_fields.clone(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestrationError::PayloadValidation {
                case_type: submission.case_type,
                missing,
            })
        }
    }

    /// Mark every pending/ready/running step `Ready` whose dependencies are
    /// now satisfied, enqueue one task per newly-ready step, and return the
    /// dispatched step ids.
    fn dispatch_ready_steps(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        case: &Case,
    ) -> OrchestrationResult<Vec<String>> {
        let mut dispatched = Vec::new();

        for step_id in instance.ready_candidates(definition) {
            let Some(spec) = definition.get_step(&step_id) else {
                continue;
            };
            if !self.capabilities.contains(&spec.capability) {
                // The worker turns this into a permanent step failure at
                // dispatch time; flag it early for operators.
                warn!(
                    step_id = %step_id,
                    capability = %spec.capability,
                    "Step dispatched against unregistered capability"
                );
            }

            let payload = Self::build_step_payload(case, instance, spec);
            let task = QueuedTask::new(
                instance.instance_id,
                step_id.clone(),
                spec.capability.clone(),
                case.priority,
                payload,
                spec.retry_policy.clone(),
                spec.timeout_ms,
                case.correlation_id,
            );
            let task_id = self.queue.enqueue(task, Duration::ZERO)?;

            instance
                .step_statuses
                .insert(step_id.clone(), StepStatus::Ready);
            self.events.publish(
                names::STEP_ENQUEUED,
                json!({
                    "task_id": task_id,
                    "instance_id": instance.instance_id,
                    "case_id": case.case_id,
                    "step_id": step_id,
                    "capability": spec.capability,
                }),
            );
            dispatched.push(step_id);
        }

        Ok(dispatched)
    }

    /// Task payload: the case payload enriched with the results of this
    /// step's direct dependencies under `<dep>_result` keys.
    fn build_step_payload(case: &Case, instance: &WorkflowInstance, spec: &StepSpec) -> Value {
        let mut fields = match &case.payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };

        for dep_id in &spec.depends_on {
            if let Some(result) = instance.step_results.get(dep_id) {
                fields.insert(format!("{dep_id}_result"), result.clone());
            }
        }
        Value::Object(fields)
    }

    /// Cascade a required-step failure: the reported step keeps
    /// `reported_status`, everything not yet started is skipped, and the
    /// instance is closed.
    fn fail_instance(instance: &mut WorkflowInstance, step_id: &str, reported_status: StepStatus) {
        instance
            .step_statuses
            .insert(step_id.to_string(), reported_status);
        for unstarted in instance.unstarted_steps() {
            instance
                .step_statuses
                .insert(unstarted, StepStatus::Skipped);
        }
        instance.completed_at = Some(chrono::Utc::now());
    }

    /// Walk the case forward to the lifecycle state matching the furthest
    /// phase among the just-dispatched steps. Each edge is one transition
    /// with its own audit record; no edge is ever walked twice.
    async fn advance_phase(
        &self,
        case_id: Uuid,
        definition: &WorkflowDefinition,
        dispatched: &[String],
    ) -> OrchestrationResult<()> {
        let target = dispatched
            .iter()
            .filter_map(|step_id| definition.get_step(step_id))
            .map(|spec| spec.phase.target_state())
            .max_by_key(CaseState::progress_rank);

        if let Some(target) = target {
            self.drive_case_forward(case_id, target, "phase_advanced")
                .await?;
        }
        Ok(())
    }

    async fn drive_case_forward(
        &self,
        case_id: Uuid,
        target: CaseState,
        trigger: &str,
    ) -> OrchestrationResult<()> {
        let mut current = self.state_machine.get_case(case_id).await?.current_state;
        while !current.is_terminal() && current.progress_rank() < target.progress_rank() {
            let Some(next) = current.next_forward() else {
                break;
            };
            let case = self
                .state_machine
                .transition(case_id, next, trigger, "system")
                .await?;
            current = case.current_state;
        }
        Ok(())
    }

    /// Close out an instance whose steps are all terminal.
    async fn finalize_instance(
        &self,
        case_id: Uuid,
        instance_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> OrchestrationResult<()> {
        let all_required_succeeded = {
            let Some(mut instance) = self.instances.get_mut(&instance_id) else {
                return Ok(());
            };
            if instance.completed_at.is_some() {
                return Ok(());
            }
            instance.completed_at = Some(chrono::Utc::now());
            instance.all_required_succeeded(definition)
        };

        if all_required_succeeded {
            self.drive_case_forward(case_id, CaseState::Resolved, "workflow_completed")
                .await?;
            info!(
                case_id = %case_id,
                instance_id = %instance_id,
                "🏁 Workflow instance resolved"
            );
        } else {
            // Required steps can only be non-succeeded here through a skip
            // path that should have closed the instance already.
            self.state_machine
                .transition(case_id, CaseState::Failed, "workflow_incomplete", "system")
                .await?;
        }

        self.events.publish(
            names::INSTANCE_COMPLETED,
            json!({
                "instance_id": instance_id,
                "case_id": case_id,
                "outcome": if all_required_succeeded { "resolved" } else { "failed" },
            }),
        );
        Ok(())
    }

    fn advancement_lock(&self, case_id: Uuid) -> Arc<Mutex<()>> {
        self.advancement_locks
            .entry(case_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
