use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;

use crate::state_machine::states::CaseState;

/// Per-step retry configuration applied by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total invocation attempts before the task is dead-lettered
    pub max_attempts: u32,
    /// Backoff delay before the second attempt
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay
    pub max_delay_ms: u64,
    /// Fraction of the computed delay randomized away (0.0 - 1.0)
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 3_600_000,
            jitter_fraction: 0.1,
        }
    }
}

/// Lifecycle phase a step belongs to. Drives mid-flight case state
/// advancement: dispatching a step of a later phase moves the case forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Investigate,
    Validate,
    Remediate,
}

impl StepPhase {
    /// The case state this phase corresponds to.
    pub fn target_state(&self) -> CaseState {
        match self {
            Self::Investigate => CaseState::Investigating,
            Self::Validate => CaseState::Validating,
            Self::Remediate => CaseState::Remediating,
        }
    }
}

impl Default for StepPhase {
    fn default() -> Self {
        Self::Investigate
    }
}

/// One node in a workflow DAG, mapped to a registered capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_id: String,
    /// Capability name resolved through the service registry at execution time
    pub capability: String,
    /// Step ids that must succeed before this step becomes ready
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Required steps cascade their failure to the whole instance;
    /// optional steps are skipped on failure
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub phase: StepPhase,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Per-invocation timeout enforced by the worker
    #[serde(default = "default_step_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_required() -> bool {
    true
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

impl StepSpec {
    pub fn new(step_id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            capability: capability.into(),
            depends_on: Vec::new(),
            required: true,
            phase: StepPhase::default(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: default_step_timeout_ms(),
        }
    }

    pub fn depends_on(mut self, step_ids: &[&str]) -> Self {
        self.depends_on = step_ids.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn phase(mut self, phase: StepPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Validation failures raised at definition registration time
#[derive(Debug, thiserror::Error)]
pub enum WorkflowValidationError {
    #[error("Workflow definition '{definition_id}' has no steps")]
    Empty { definition_id: String },

    #[error("Duplicate step id '{step_id}' in definition '{definition_id}'")]
    DuplicateStepId {
        definition_id: String,
        step_id: String,
    },

    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("Workflow definition '{definition_id}' contains a dependency cycle involving: {remaining:?}")]
    CycleDetected {
        definition_id: String,
        remaining: Vec<String>,
    },
}

/// Versioned, immutable DAG template of steps for a case type.
///
/// Loaded once at registration, shared read-only across all instances.
/// Cyclic definitions are rejected before any instance can be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub definition_id: String,
    pub version: String,
    pub steps: Vec<StepSpec>,
    /// Top-level payload fields a submission must carry for this workflow
    #[serde(default)]
    pub required_payload_fields: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(definition_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            definition_id: definition_id.into(),
            version: version.into(),
            steps: Vec::new(),
            required_payload_fields: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn required_payload_fields(mut self, fields: &[&str]) -> Self {
        self.required_payload_fields = fields.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn get_step(&self, step_id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Steps that declare `step_id` as a direct dependency.
    pub fn direct_dependents(&self, step_id: &str) -> Vec<&StepSpec> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == step_id))
            .collect()
    }

    /// Validate structural integrity: unique step ids, known dependencies,
    /// and acyclicity via Kahn's topological sort.
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.steps.is_empty() {
            return Err(WorkflowValidationError::Empty {
                definition_id: self.definition_id.clone(),
            });
        }

        let mut seen = HashMap::new();
        for step in &self.steps {
            if seen.insert(step.step_id.as_str(), ()).is_some() {
                return Err(WorkflowValidationError::DuplicateStepId {
                    definition_id: self.definition_id.clone(),
                    step_id: step.step_id.clone(),
                });
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains_key(dep.as_str()) {
                    return Err(WorkflowValidationError::UnknownDependency {
                        step_id: step.step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm. Steps left unordered indicate a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, WorkflowValidationError> {
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.depends_on.len()))
            .collect();

        let mut frontier: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(step_id) = frontier.pop_front() {
            order.push(step_id.to_string());
            for dependent in self.direct_dependents(step_id) {
                if let Some(degree) = in_degree.get_mut(dependent.step_id.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.push_back(dependent.step_id.as_str());
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            let remaining = self
                .steps
                .iter()
                .filter(|s| !order.contains(&s.step_id))
                .map(|s| s.step_id.clone())
                .collect();
            return Err(WorkflowValidationError::CycleDetected {
                definition_id: self.definition_id.clone(),
                remaining,
            });
        }
        Ok(order)
    }
}

/// Per-step execution status within one workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on unmet dependencies
    Pending,
    /// All dependencies satisfied, task enqueued
    Ready,
    /// Leased by a worker
    Running,
    /// Handler reported success
    Succeeded,
    /// Permanent failure (exhausted retries or non-retryable error)
    Failed,
    /// Never executed: cancelled, cascaded, or optional-step failure
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether this status alone satisfies a dependent's dependency edge.
    /// Skipped optional steps are handled separately at the instance level.
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A live binding of a `WorkflowDefinition` to one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: Uuid,
    pub case_id: Uuid,
    pub definition_id: String,
    pub step_statuses: HashMap<String, StepStatus>,
    /// Results of succeeded steps, merged into dependent task payloads
    pub step_results: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(case_id: Uuid, definition: &WorkflowDefinition) -> Self {
        let step_statuses = definition
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), StepStatus::Pending))
            .collect();
        Self {
            instance_id: Uuid::new_v4(),
            case_id,
            definition_id: definition.definition_id.clone(),
            step_statuses,
            step_results: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.step_statuses.get(step_id).copied()
    }

    /// A dependency edge is satisfied by a succeeded dependency, or by a
    /// skipped one when the dependency itself was optional.
    fn dependency_satisfied(&self, definition: &WorkflowDefinition, dep_id: &str) -> bool {
        let Some(status) = self.status_of(dep_id) else {
            return false;
        };
        if status.satisfies_dependencies() {
            return true;
        }
        status == StepStatus::Skipped
            && definition.get_step(dep_id).is_some_and(|spec| !spec.required)
    }

    /// Pending steps whose every dependency is now satisfied.
    pub fn ready_candidates(&self, definition: &WorkflowDefinition) -> Vec<String> {
        definition
            .steps
            .iter()
            .filter(|spec| self.status_of(&spec.step_id) == Some(StepStatus::Pending))
            .filter(|spec| {
                spec.depends_on
                    .iter()
                    .all(|dep| self.dependency_satisfied(definition, dep))
            })
            .map(|spec| spec.step_id.clone())
            .collect()
    }

    /// Steps that have not started executing (candidates for skipping on
    /// cancellation or failure cascade).
    pub fn unstarted_steps(&self) -> Vec<String> {
        self.step_statuses
            .iter()
            .filter(|(_, status)| {
                matches!(status, StepStatus::Pending | StepStatus::Ready | StepStatus::Running)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.step_statuses.values().all(|s| s.is_terminal())
    }

    pub fn all_required_succeeded(&self, definition: &WorkflowDefinition) -> bool {
        definition
            .steps
            .iter()
            .filter(|spec| spec.required)
            .all(|spec| self.status_of(&spec.step_id) == Some(StepStatus::Succeeded))
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn diamond() -> WorkflowDefinition {
        WorkflowDefinition::new("diamond", "1.0.0")
            .step(StepSpec::new("a", "cap-a"))
            .step(StepSpec::new("b", "cap-b").depends_on(&["a"]))
            .step(StepSpec::new("c", "cap-c").depends_on(&["a"]))
            .step(StepSpec::new("d", "cap-d").depends_on(&["b", "c"]))
    }

    #[test]
    fn test_valid_dag_accepted() {
        assert!(diamond().validate().is_ok());
        let order = diamond().topological_order().unwrap();
        assert_eq!(order.first().map(String::as_str), Some("a"));
        assert_eq!(order.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn test_cycle_rejected() {
        let definition = WorkflowDefinition::new("cyclic", "1.0.0")
            .step(StepSpec::new("a", "cap-a").depends_on(&["c"]))
            .step(StepSpec::new("b", "cap-b").depends_on(&["a"]))
            .step(StepSpec::new("c", "cap-c").depends_on(&["b"]));

        let err = definition.validate().unwrap_err();
        assert!(matches!(err, WorkflowValidationError::CycleDetected { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let definition =
            WorkflowDefinition::new("selfie", "1.0.0").step(StepSpec::new("a", "cap-a").depends_on(&["a"]));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let definition = WorkflowDefinition::new("dangling", "1.0.0")
            .step(StepSpec::new("a", "cap-a").depends_on(&["ghost"]));
        let err = definition.validate().unwrap_err();
        assert!(matches!(
            err,
            WorkflowValidationError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let definition = WorkflowDefinition::new("dupe", "1.0.0")
            .step(StepSpec::new("a", "cap-a"))
            .step(StepSpec::new("a", "cap-b"));
        let err = definition.validate().unwrap_err();
        assert!(matches!(
            err,
            WorkflowValidationError::DuplicateStepId { .. }
        ));
    }

    #[test]
    fn test_empty_definition_rejected() {
        let definition = WorkflowDefinition::new("empty", "1.0.0");
        assert!(matches!(
            definition.validate().unwrap_err(),
            WorkflowValidationError::Empty { .. }
        ));
    }

    #[test]
    fn test_readiness_gating_in_diamond() {
        let definition = diamond();
        let mut instance = WorkflowInstance::new(Uuid::new_v4(), &definition);

        // Only the root is ready at creation time.
        assert_eq!(instance.ready_candidates(&definition), vec!["a".to_string()]);

        instance
            .step_statuses
            .insert("a".to_string(), StepStatus::Succeeded);
        let mut ready = instance.ready_candidates(&definition);
        ready.sort();
        assert_eq!(ready, vec!["b".to_string(), "c".to_string()]);

        // d stays pending until both b and c succeed.
        instance
            .step_statuses
            .insert("b".to_string(), StepStatus::Succeeded);
        assert_eq!(instance.ready_candidates(&definition), vec!["c".to_string()]);

        instance
            .step_statuses
            .insert("c".to_string(), StepStatus::Succeeded);
        assert_eq!(instance.ready_candidates(&definition), vec!["d".to_string()]);
    }

    #[test]
    fn test_skipped_optional_dependency_satisfies_dependents() {
        let definition = WorkflowDefinition::new("optional-branch", "1.0.0")
            .step(StepSpec::new("scan", "cap-scan").optional())
            .step(StepSpec::new("report", "cap-report").depends_on(&["scan"]));
        let mut instance = WorkflowInstance::new(Uuid::new_v4(), &definition);

        instance
            .step_statuses
            .insert("scan".to_string(), StepStatus::Skipped);
        assert_eq!(
            instance.ready_candidates(&definition),
            vec!["report".to_string()]
        );
    }

    #[test]
    fn test_skipped_required_dependency_blocks_dependents() {
        let definition = WorkflowDefinition::new("required-branch", "1.0.0")
            .step(StepSpec::new("scan", "cap-scan"))
            .step(StepSpec::new("report", "cap-report").depends_on(&["scan"]));
        let mut instance = WorkflowInstance::new(Uuid::new_v4(), &definition);

        instance
            .step_statuses
            .insert("scan".to_string(), StepStatus::Skipped);
        assert!(instance.ready_candidates(&definition).is_empty());
    }
}
