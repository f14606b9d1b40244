use uuid::Uuid;

/// Failures at the task queue boundary.
///
/// Enqueue-side failures are hard errors reported to the caller; the queue
/// never silently drops or silently retries work.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue depth reached the configured ceiling; callers surface this as
    /// backpressure (429/503 at the request boundary).
    #[error("Queue saturated: depth {depth} at configured maximum {max_depth}")]
    CapacityExceeded { depth: usize, max_depth: usize },

    /// Serialized payload exceeds the configured limit; rejected at enqueue.
    #[error("Task payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Task {task_id} not found")]
    UnknownTask { task_id: Uuid },

    /// Ack/nack against a task the caller does not hold a lease on
    #[error("Task {task_id} is not currently leased")]
    NotLeased { task_id: Uuid },

    #[error("Task {task_id} is not in the dead-letter queue")]
    NotDeadLettered { task_id: Uuid },

    #[error("Task payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
