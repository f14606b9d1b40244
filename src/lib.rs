#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Triage Core
//!
//! High-performance Rust core for incident case orchestration: a DAG
//! workflow executor, a finite-state case-lifecycle manager, and a priority
//! task queue with retry/backoff semantics.
//!
//! ## Overview
//!
//! An incoming incident (a CI failure, a spam/fraud signal, a compliance
//! flag) becomes a **case**. The orchestrator binds the case to a versioned
//! workflow definition (an immutable DAG of capability steps), dispatches
//! ready steps through the priority queue, and drives the case lifecycle as
//! workers report step outcomes.
//!
//! Three guarantees hold simultaneously:
//!
//! - **Ordering**: steps execute only after their declared dependencies
//!   succeed.
//! - **Exactly-once-effective transitions**: duplicate task deliveries
//!   (at-least-once queue semantics) never double-advance a workflow.
//! - **Bounded retry with backpressure**: failing steps retry with
//!   exponential backoff up to a limit, after which the case itself is
//!   failed and the operator notified; a saturated queue rejects new
//!   submissions instead of queueing unbounded work.
//!
//! ## Module Organization
//!
//! - [`models`] - Cases, workflow definitions/instances, tasks, transitions
//! - [`state_machine`] - Case lifecycle states and the locked transition contract
//! - [`queue`] - Priority task queue with leases, backoff, and dead-lettering
//! - [`registry`] - Capability name to handler resolution
//! - [`orchestration`] - Orchestrator, worker pool, webhook, system wiring
//! - [`events`] - Broadcast lifecycle event publisher
//! - [`config`] - Runtime configuration
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use triage_core::config::TriageConfig;
//! use triage_core::models::{CaseType, StepSpec, WorkflowDefinition};
//! use triage_core::orchestration::{CaseSubmission, OrchestrationSystem};
//! use triage_core::registry::{CapabilityHandler, HandlerResult};
//!
//! struct LogParser;
//!
//! #[async_trait]
//! impl CapabilityHandler for LogParser {
//!     async fn invoke(&self, payload: &Value) -> HandlerResult {
//!         Ok(json!({"root_cause": "assertion failure"}))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let system = OrchestrationSystem::build(&TriageConfig::default());
//! system.register_capability("ci-log-parse", Arc::new(LogParser));
//! system.register_definition(
//!     CaseType::CiFailure,
//!     WorkflowDefinition::new("ci-pipeline", "1.0.0")
//!         .step(StepSpec::new("parse", "ci-log-parse")),
//! )?;
//! system.start();
//!
//! let receipt = system
//!     .submit(CaseSubmission::new(CaseType::CiFailure, json!({"log": "..."})))
//!     .await?;
//! let status = system.status(receipt.instance_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod registry;
pub mod state_machine;

pub use config::TriageConfig;
pub use error::{Result, TriageError};
pub use models::{
    Case, CasePriority, CaseType, QueuedTask, RetryPolicy, StateTransition, StepPhase, StepSpec,
    StepStatus, TaskStatus, WorkflowDefinition, WorkflowInstance,
};
pub use orchestration::{
    CaseSubmission, CompletionReport, InstanceStatusView, OrchestrationError, OrchestrationSystem,
    StepOutcome, SubmitReceipt, WorkflowOrchestrator,
};
pub use queue::{NackDisposition, QueueError, QueueSettings, QueueStats, TaskQueue};
pub use registry::{CapabilityHandler, CapabilityRegistry, HandlerError, HandlerResult};
pub use state_machine::{CaseState, CaseStateMachine, StateMachineError};
