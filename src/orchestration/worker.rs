//! # Worker Pool
//!
//! N stateless execution loops over the shared task queue. Each loop:
//! dequeue -> resolve capability -> invoke with the step timeout -> ack and
//! report, or nack into the retry path. Any worker may process any task;
//! horizontal scale is just a bigger `worker_count`.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::QueuedTask;
use crate::orchestration::orchestrator::WorkflowOrchestrator;
use crate::orchestration::types::{CompletionReport, StepOutcome};
use crate::queue::{NackDisposition, TaskQueue};
use crate::registry::CapabilityRegistry;

/// Fixed-size pool of concurrent step executors.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    capabilities: Arc<CapabilityRegistry>,
    orchestrator: Arc<WorkflowOrchestrator>,
    worker_count: usize,
    lease_duration: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        capabilities: Arc<CapabilityRegistry>,
        orchestrator: Arc<WorkflowOrchestrator>,
        worker_count: usize,
        lease_duration: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            capabilities,
            orchestrator,
            worker_count: worker_count.max(1),
            lease_duration,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops. Idempotent only in the sense that calling it
    /// twice doubles the pool; callers start once.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for index in 0..self.worker_count {
            let worker = StepWorker {
                worker_id: format!("worker-{index}"),
                queue: Arc::clone(&self.queue),
                capabilities: Arc::clone(&self.capabilities),
                orchestrator: Arc::clone(&self.orchestrator),
                lease_duration: self.lease_duration,
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker.run(shutdown_rx)));
        }
        info!(worker_count = self.worker_count, "👷 Worker pool started");
    }

    /// Signal shutdown and wait for every loop to drain its current task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        join_all(handles).await;
        info!("👋 Worker pool stopped");
    }
}

struct StepWorker {
    worker_id: String,
    queue: Arc<TaskQueue>,
    capabilities: Arc<CapabilityRegistry>,
    orchestrator: Arc<WorkflowOrchestrator>,
    lease_duration: Duration,
}

impl StepWorker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker_id = %self.worker_id, "Worker loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                leased = self.queue.dequeue(&self.worker_id, self.lease_duration) => {
                    if let Some(task) = leased {
                        self.process(task).await;
                    }
                }
            }
        }
        debug!(worker_id = %self.worker_id, "Worker loop stopped");
    }

    async fn process(&self, task: QueuedTask) {
        self.orchestrator
            .note_step_started(task.instance_id, &task.step_id);

        let outcome = match self.capabilities.resolve(&task.capability) {
            None => {
                // Retrying cannot fix a missing registration; fail the step
                // permanently without burning the retry budget.
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    capability = %task.capability,
                    "🚫 Capability not registered, failing step permanently"
                );
                self.ack(&task);
                Some(StepOutcome::Failed {
                    error: format!("capability '{}' not registered", task.capability),
                })
            }
            Some(handler) => {
                let timeout = Duration::from_millis(task.timeout_ms);
                match tokio::time::timeout(timeout, handler.invoke(&task.payload)).await {
                    Ok(Ok(result)) => {
                        self.ack(&task);
                        Some(StepOutcome::Succeeded(result))
                    }
                    Ok(Err(err)) if !err.is_retryable() => {
                        self.ack(&task);
                        Some(StepOutcome::Failed {
                            error: err.to_string(),
                        })
                    }
                    Ok(Err(err)) => self.nack(&task, &err.to_string()),
                    Err(_) => {
                        let error = format!("step timed out after {}ms", task.timeout_ms);
                        self.nack(&task, &error)
                    }
                }
            }
        };

        if let Some(outcome) = outcome {
            let report = CompletionReport {
                task_id: task.task_id,
                instance_id: task.instance_id,
                step_id: task.step_id.clone(),
                worker_id: self.worker_id.clone(),
                outcome,
            };
            if let Err(err) = self.orchestrator.handle_report(report).await {
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    error = %err,
                    "Failed to apply completion report"
                );
            }
        }
    }

    fn ack(&self, task: &QueuedTask) {
        if let Err(err) = self.queue.ack(task.task_id) {
            warn!(
                worker_id = %self.worker_id,
                task_id = %task.task_id,
                error = %err,
                "Ack failed"
            );
        }
    }

    /// Nack into the retry path. Returns a completion report outcome only
    /// when the queue dead-letters the task (retries exhausted).
    fn nack(&self, task: &QueuedTask, error: &str) -> Option<StepOutcome> {
        match self.queue.nack(task.task_id, error, true) {
            Ok(NackDisposition::Retried { delay }) => {
                debug!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    delay_ms = delay.as_millis() as u64,
                    "Step failed transiently, queue will retry"
                );
                None
            }
            Ok(NackDisposition::DeadLettered) => Some(StepOutcome::Failed {
                error: format!("retries exhausted: {error}"),
            }),
            Err(err) => {
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    error = %err,
                    "Nack failed"
                );
                None
            }
        }
    }
}
