// Priority task queue with retry/backoff and dead-letter semantics

pub mod backoff;
pub mod errors;
pub mod task_queue;

pub use backoff::backoff_delay;
pub use errors::{QueueError, QueueResult};
pub use task_queue::{NackDisposition, QueueSettings, QueueStats, TaskQueue};
