//! Event system foundation: broadcast publisher for lifecycle events.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};

/// Well-known lifecycle event names
pub mod names {
    /// A case moved along an edge of the transition table
    pub const CASE_STATE_CHANGED: &str = "case.state.changed";
    /// A workflow instance reached a terminal outcome
    pub const INSTANCE_COMPLETED: &str = "workflow.instance.completed";
    /// A step task was enqueued for execution
    pub const STEP_ENQUEUED: &str = "workflow.step.enqueued";
    /// A task exhausted its retry budget and was dead-lettered
    pub const TASK_DEAD_LETTERED: &str = "queue.task.dead_lettered";
}
