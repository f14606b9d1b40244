//! # Orchestration Engine
//!
//! Coordinates case workflow execution: definition registration, instance
//! creation, step dispatch through the priority queue, completion-driven
//! DAG advancement, and terminal-state notification.
//!
//! ## Core Components
//!
//! - [`WorkflowOrchestrator`]: submission, step advancement, cancellation
//! - [`DefinitionRegistry`]: case-type to validated workflow binding
//! - [`WorkerPool`]: concurrent dequeue/invoke/report loops
//! - [`CompletionWebhook`]: best-effort terminal-state delivery
//! - [`OrchestrationSystem`]: fully-wired embedded deployment

pub mod definition_registry;
pub mod errors;
pub mod orchestrator;
pub mod system;
pub mod types;
pub mod webhook;
pub mod worker;

pub use definition_registry::DefinitionRegistry;
pub use errors::{OrchestrationError, OrchestrationResult};
pub use orchestrator::WorkflowOrchestrator;
pub use system::OrchestrationSystem;
pub use types::{
    CaseSubmission, CompletionReport, InstanceStatusView, StepOutcome, SubmitReceipt,
};
pub use webhook::{CompletionNotice, CompletionWebhook};
pub use worker::WorkerPool;
