//! Data model layer for case orchestration.
//!
//! Cases, workflow definitions/instances, queued tasks, and the append-only
//! state transition audit records. Models are plain serializable data; all
//! mutation goes through the state machine and orchestrator components.

pub mod case;
pub mod task;
pub mod transition;
pub mod workflow;

pub use case::{Case, CasePriority, CaseType};
pub use task::{QueuedTask, TaskStatus, TASK_SCHEMA_VERSION};
pub use transition::StateTransition;
pub use workflow::{
    RetryPolicy, StepPhase, StepSpec, StepStatus, WorkflowDefinition, WorkflowInstance,
};
