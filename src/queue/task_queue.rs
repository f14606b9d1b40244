//! Priority task queue with at-least-once delivery and a dead-letter sink.
//!
//! Ordering is strict priority first, then earliest visibility within a
//! tier, with one twist: tasks that have waited longer than the configured
//! aging threshold are promoted one tier per elapsed threshold so sustained
//! high-priority load cannot starve low-priority work forever.
//!
//! Delivery is at-least-once: a leased task that is neither acked nor nacked
//! before its lease expires becomes visible again with its attempt counter
//! incremented. Callers de-duplicate on `task_id`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{names, EventPublisher};
use crate::models::{QueuedTask, TaskStatus};
use crate::queue::backoff::backoff_delay;
use crate::queue::errors::{QueueError, QueueResult};

const TIER_COUNT: usize = 4;

/// Tunables for queue capacity, polling, and starvation protection
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum queued (visible + scheduled) tasks before enqueue fails
    pub max_depth: usize,
    /// Maximum serialized payload size accepted at enqueue
    pub max_payload_bytes: usize,
    /// How long a single `dequeue` call blocks waiting for work
    pub poll_timeout: Duration,
    /// Wait time after which a task is promoted one priority tier
    pub aging_threshold: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_depth: 10_000,
            max_payload_bytes: 256 * 1024,
            poll_timeout: Duration::from_millis(500),
            aging_threshold: Duration::from_secs(60),
        }
    }
}

/// Outcome of a negative acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub enum NackDisposition {
    /// Re-queued behind an exponential backoff delay
    Retried { delay: Duration },
    /// Retry budget exhausted; routed to the dead-letter queue
    DeadLettered,
}

/// Point-in-time queue depth snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub scheduled: usize,
    pub leased: usize,
    pub dead_lettered: usize,
    pub total_tracked: usize,
}

struct Lease {
    worker_id: String,
    expires_at: DateTime<Utc>,
}

struct QueueInner {
    /// Task store: metadata for every task the queue has seen
    tasks: HashMap<Uuid, QueuedTask>,
    /// Immediately-visible task ids, one FIFO per priority tier
    tiers: [VecDeque<Uuid>; TIER_COUNT],
    /// Delayed and backoff tasks ordered by visibility time
    scheduled: BTreeMap<(DateTime<Utc>, Uuid), Uuid>,
    leases: HashMap<Uuid, Lease>,
    dead_letter: VecDeque<Uuid>,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            tiers: Default::default(),
            scheduled: BTreeMap::new(),
            leases: HashMap::new(),
            dead_letter: VecDeque::new(),
        }
    }

    fn queued_depth(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum::<usize>() + self.scheduled.len()
    }

    /// Move due scheduled tasks into their priority tier.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<(DateTime<Utc>, Uuid)> = self
            .scheduled
            .range(..=(now, Uuid::max()))
            .map(|(key, _)| *key)
            .collect();
        for key in due {
            if let Some(task_id) = self.scheduled.remove(&key) {
                if let Some(task) = self.tasks.get(&task_id) {
                    let tier = task.priority.tier() as usize - 1;
                    self.tiers[tier].push_back(task_id);
                }
            }
        }
    }

    /// Requeue (or dead-letter) tasks whose lease has expired.
    fn reap_expired_leases(&mut self, now: DateTime<Utc>, events: &EventPublisher) {
        let expired: Vec<Uuid> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(task_id, _)| *task_id)
            .collect();

        for task_id in expired {
            let Some(lease) = self.leases.remove(&task_id) else {
                continue;
            };
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            task.attempt_count += 1;
            warn!(
                task_id = %task_id,
                worker_id = %lease.worker_id,
                attempt_count = task.attempt_count,
                "⏰ Lease expired, reclaiming task"
            );

            if task.retries_exhausted() {
                task.status = TaskStatus::DeadLettered;
                task.last_error = Some(format!(
                    "lease expired after {} attempts",
                    task.attempt_count
                ));
                self.dead_letter.push_back(task_id);
                events.publish(
                    names::TASK_DEAD_LETTERED,
                    json!({
                        "task_id": task_id,
                        "instance_id": task.instance_id,
                        "step_id": task.step_id,
                        "reason": "lease_expired",
                    }),
                );
            } else {
                task.status = TaskStatus::Queued;
                task.visible_after = now;
                let tier = task.priority.tier() as usize - 1;
                self.tiers[tier].push_back(task_id);
            }
        }
    }

    /// Pick the best tier head by aged effective priority, then earliest
    /// visibility. Within a tier FIFO order already approximates
    /// earliest-visible-first.
    fn pop_best(&mut self, now: DateTime<Utc>, aging_threshold: Duration) -> Option<Uuid> {
        let aging_ms = aging_threshold.as_millis() as u64;
        let mut best: Option<(u8, DateTime<Utc>, usize)> = None;

        for (index, tier_queue) in self.tiers.iter().enumerate() {
            let Some(task_id) = tier_queue.front() else {
                continue;
            };
            let Some(task) = self.tasks.get(task_id) else {
                continue;
            };
            let waited_ms = (now - task.visible_after).num_milliseconds().max(0) as u64;
            let boost = if aging_ms > 0 { waited_ms / aging_ms } else { 0 };
            let effective = (index as u64 + 1).saturating_sub(boost).max(1) as u8;

            let candidate = (effective, task.visible_after, index);
            if best.map_or(true, |current| candidate < current) {
                best = Some(candidate);
            }
        }

        let (_, _, index) = best?;
        self.tiers[index].pop_front()
    }

    /// Earliest instant at which new work could become visible without an
    /// enqueue: the next scheduled task or the next lease expiry.
    fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let next_scheduled = self.scheduled.keys().next().map(|(at, _)| *at);
        let next_lease = self.leases.values().map(|lease| lease.expires_at).min();
        match (next_scheduled, next_lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Durable-store-shaped priority queue for step execution tasks.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    settings: QueueSettings,
    events: EventPublisher,
}

impl TaskQueue {
    pub fn new(settings: QueueSettings, events: EventPublisher) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            notify: Notify::new(),
            settings,
            events,
        }
    }

    /// Accept a task for delivery after `delay`.
    ///
    /// Oversize payloads and a saturated queue are hard errors; nothing is
    /// ever silently dropped or silently queued.
    pub fn enqueue(&self, mut task: QueuedTask, delay: Duration) -> QueueResult<Uuid> {
        let payload_size = serde_json::to_vec(&task.payload)?.len();
        if payload_size > self.settings.max_payload_bytes {
            return Err(QueueError::PayloadTooLarge {
                size: payload_size,
                limit: self.settings.max_payload_bytes,
            });
        }

        let task_id = task.task_id;
        let now = Utc::now();
        {
            let mut inner = self.inner.lock();
            let depth = inner.queued_depth();
            if depth >= self.settings.max_depth {
                error!(
                    depth = depth,
                    max_depth = self.settings.max_depth,
                    "🚫 Queue saturated, rejecting enqueue"
                );
                return Err(QueueError::CapacityExceeded {
                    depth,
                    max_depth: self.settings.max_depth,
                });
            }

            task.status = TaskStatus::Queued;
            task.visible_after = now
                + ChronoDuration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);

            debug!(
                task_id = %task_id,
                step_id = %task.step_id,
                priority = %task.priority,
                delay_ms = delay.as_millis() as u64,
                "📥 Task enqueued"
            );

            if task.visible_after > now {
                inner.scheduled.insert((task.visible_after, task_id), task_id);
            } else {
                let tier = task.priority.tier() as usize - 1;
                inner.tiers[tier].push_back(task_id);
            }
            inner.tasks.insert(task_id, task);
        }

        self.notify.notify_waiters();
        Ok(task_id)
    }

    /// Lease the next visible task, blocking up to the configured poll
    /// timeout. Returns `None` when no work became available in time.
    pub async fn dequeue(&self, worker_id: &str, lease_duration: Duration) -> Option<QueuedTask> {
        let deadline = Instant::now() + self.settings.poll_timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wakeup = {
                let mut inner = self.inner.lock();
                let now = Utc::now();
                inner.reap_expired_leases(now, &self.events);
                inner.promote_due(now);

                if let Some(task_id) = inner.pop_best(now, self.settings.aging_threshold) {
                    if let Some(task) = inner.tasks.get_mut(&task_id) {
                        task.status = TaskStatus::Leased;
                        let leased = task.clone();
                        let expires_at = now
                            + ChronoDuration::milliseconds(lease_duration.as_millis() as i64);
                        inner.leases.insert(
                            task_id,
                            Lease {
                                worker_id: worker_id.to_string(),
                                expires_at,
                            },
                        );
                        debug!(
                            task_id = %task_id,
                            worker_id = worker_id,
                            attempt_count = leased.attempt_count,
                            "📤 Task leased"
                        );
                        return Some(leased);
                    }
                }
                inner.next_wakeup()
            };

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let mut wait = deadline - now;
            if let Some(wakeup) = next_wakeup {
                let until = (wakeup - Utc::now()).num_milliseconds().max(1) as u64;
                wait = wait.min(Duration::from_millis(until));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Positively acknowledge a delivered task, removing it from delivery
    /// permanently. Acking an already-done task is a no-op.
    pub fn ack(&self, task_id: Uuid) -> QueueResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(QueueError::UnknownTask { task_id })?;

        match task.status {
            TaskStatus::Done => Ok(()),
            TaskStatus::Leased => {
                task.status = TaskStatus::Done;
                inner.leases.remove(&task_id);
                debug!(task_id = %task_id, "✅ Task acked");
                Ok(())
            }
            TaskStatus::Queued => {
                // Lease expired and the task was requeued before the late
                // ack arrived; honor the ack and withdraw it from delivery.
                task.status = TaskStatus::Done;
                for tier in &mut inner.tiers {
                    tier.retain(|id| *id != task_id);
                }
                inner.scheduled.retain(|_, id| *id != task_id);
                debug!(task_id = %task_id, "✅ Task acked after lease expiry");
                Ok(())
            }
            TaskStatus::DeadLettered => Err(QueueError::NotLeased { task_id }),
        }
    }

    /// Negatively acknowledge a delivered task.
    ///
    /// With `retry` and budget remaining, the task is re-queued behind an
    /// exponential backoff delay; otherwise it is dead-lettered with the
    /// final error retained for manual replay.
    pub fn nack(&self, task_id: Uuid, error: &str, retry: bool) -> QueueResult<NackDisposition> {
        let disposition = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::UnknownTask { task_id })?;
            if task.status != TaskStatus::Leased {
                return Err(QueueError::NotLeased { task_id });
            }

            inner.leases.remove(&task_id);
            task.attempt_count += 1;
            task.last_error = Some(error.to_string());

            if retry && !task.retries_exhausted() {
                let delay = backoff_delay(&task.retry_policy, task.attempt_count);
                task.status = TaskStatus::Queued;
                task.visible_after =
                    Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
                inner.scheduled.insert((task.visible_after, task_id), task_id);
                warn!(
                    task_id = %task_id,
                    attempt_count = task.attempt_count,
                    max_attempts = task.retry_policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = error,
                    "🔁 Task failed, retrying with backoff"
                );
                NackDisposition::Retried { delay }
            } else {
                task.status = TaskStatus::DeadLettered;
                inner.dead_letter.push_back(task_id);
                let context = json!({
                    "task_id": task_id,
                    "instance_id": task.instance_id,
                    "step_id": task.step_id,
                    "attempt_count": task.attempt_count,
                    "error": error,
                });
                error!(
                    task_id = %task_id,
                    attempt_count = task.attempt_count,
                    error = error,
                    "💀 Task dead-lettered"
                );
                self.events.publish(names::TASK_DEAD_LETTERED, context);
                NackDisposition::DeadLettered
            }
        };

        self.notify.notify_waiters();
        Ok(disposition)
    }

    /// Inspect dead-lettered tasks, oldest first, with full payloads.
    pub fn peek_dead_letter(&self, limit: usize) -> Vec<QueuedTask> {
        let inner = self.inner.lock();
        inner
            .dead_letter
            .iter()
            .take(limit)
            .filter_map(|task_id| inner.tasks.get(task_id))
            .cloned()
            .collect()
    }

    /// Re-queue a dead-lettered task with a fresh retry budget.
    pub fn replay_dead_letter(&self, task_id: Uuid) -> QueueResult<()> {
        {
            let mut inner = self.inner.lock();
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::UnknownTask { task_id })?;
            if task.status != TaskStatus::DeadLettered {
                return Err(QueueError::NotDeadLettered { task_id });
            }

            task.status = TaskStatus::Queued;
            task.attempt_count = 0;
            task.last_error = None;
            task.visible_after = Utc::now();
            let tier = task.priority.tier() as usize - 1;
            inner.dead_letter.retain(|id| *id != task_id);
            inner.tiers[tier].push_back(task_id);
            info!(task_id = %task_id, "♻️ Dead-lettered task replayed");
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Metadata read for a known task.
    pub fn get_task(&self, task_id: Uuid) -> Option<QueuedTask> {
        self.inner.lock().tasks.get(&task_id).cloned()
    }

    /// Best-effort removal of all not-yet-leased tasks belonging to a
    /// workflow instance. Leased tasks finish; their results are discarded
    /// upstream. Returns how many tasks were withdrawn.
    pub fn withdraw_instance(&self, instance_id: Uuid) -> usize {
        let mut inner = self.inner.lock();
        let victims: Vec<Uuid> = inner
            .tasks
            .values()
            .filter(|task| task.instance_id == instance_id && task.status == TaskStatus::Queued)
            .map(|task| task.task_id)
            .collect();

        for task_id in &victims {
            for tier in &mut inner.tiers {
                tier.retain(|id| id != task_id);
            }
            inner.scheduled.retain(|_, id| id != task_id);
            if let Some(task) = inner.tasks.get_mut(task_id) {
                task.status = TaskStatus::Done;
            }
        }

        if !victims.is_empty() {
            debug!(
                instance_id = %instance_id,
                withdrawn = victims.len(),
                "🧹 Withdrew queued tasks for cancelled instance"
            );
        }
        victims.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            critical: inner.tiers[0].len(),
            high: inner.tiers[1].len(),
            normal: inner.tiers[2].len(),
            low: inner.tiers[3].len(),
            scheduled: inner.scheduled.len(),
            leased: inner.leases.len(),
            dead_lettered: inner.dead_letter.len(),
            total_tracked: inner.tasks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CasePriority, RetryPolicy};
    use serde_json::json;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 40,
            jitter_fraction: 0.0,
        }
    }

    fn task_with(priority: CasePriority, policy: RetryPolicy) -> QueuedTask {
        QueuedTask::new(
            Uuid::new_v4(),
            "step",
            "capability",
            priority,
            json!({"k": "v"}),
            policy,
            1_000,
            Uuid::new_v4(),
        )
    }

    fn queue() -> TaskQueue {
        let settings = QueueSettings {
            max_depth: 100,
            max_payload_bytes: 1024,
            poll_timeout: Duration::from_millis(300),
            aging_threshold: Duration::from_secs(3600),
        };
        TaskQueue::new(settings, EventPublisher::default())
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Low, fast_policy(3)), Duration::ZERO)
            .unwrap();
        queue
            .enqueue(
                task_with(CasePriority::Critical, fast_policy(3)),
                Duration::ZERO,
            )
            .unwrap();
        queue
            .enqueue(task_with(CasePriority::High, fast_policy(3)), Duration::ZERO)
            .unwrap();

        let first = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        let second = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        let third = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();

        assert_eq!(first.priority, CasePriority::Critical);
        assert_eq!(second.priority, CasePriority::High);
        assert_eq!(third.priority, CasePriority::Low);
    }

    #[tokio::test]
    async fn test_delayed_task_invisible_until_due() {
        let queue = queue();
        queue
            .enqueue(
                task_with(CasePriority::Normal, fast_policy(3)),
                Duration::from_millis(150),
            )
            .unwrap();

        // First poll window is shorter than the delay.
        let settings_poll = Duration::from_millis(50);
        let got = tokio::time::timeout(
            settings_poll,
            queue.dequeue("w", Duration::from_secs(30)),
        )
        .await;
        assert!(got.is_err() || got.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let task = queue.dequeue("w", Duration::from_secs(30)).await;
        assert!(task.is_some());
    }

    #[tokio::test]
    async fn test_nack_requeues_with_backoff_then_dead_letters() {
        let queue = queue();
        let task = task_with(CasePriority::Normal, fast_policy(3));
        queue.enqueue(task, Duration::ZERO).unwrap();

        for attempt in 1..=3u32 {
            let leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
            assert_eq!(leased.attempt_count, attempt - 1);
            let disposition = queue.nack(leased.task_id, "boom", true).unwrap();
            if attempt < 3 {
                assert!(matches!(disposition, NackDisposition::Retried { .. }));
                // Wait out the backoff before the next delivery.
                tokio::time::sleep(Duration::from_millis(60)).await;
            } else {
                assert_eq!(disposition, NackDisposition::DeadLettered);
            }
        }

        let dead = queue.peek_dead_letter(10);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt_count, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_non_retryable_nack_dead_letters_immediately() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(5)), Duration::ZERO)
            .unwrap();
        let leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        let disposition = queue
            .nack(leased.task_id, "missing capability", false)
            .unwrap();
        assert_eq!(disposition, NackDisposition::DeadLettered);
    }

    #[tokio::test]
    async fn test_expired_lease_redelivers_with_incremented_attempt() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(5)), Duration::ZERO)
            .unwrap();

        let first = queue.dequeue("w1", Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.attempt_count, 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = queue.dequeue("w2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_capacity_ceiling_rejects_enqueue() {
        let settings = QueueSettings {
            max_depth: 2,
            ..QueueSettings::default()
        };
        let queue = TaskQueue::new(settings, EventPublisher::default());
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(3)), Duration::ZERO)
            .unwrap();
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(3)), Duration::ZERO)
            .unwrap();

        let err = queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(3)), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, QueueError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_oversize_payload_rejected() {
        let queue = queue();
        let mut task = task_with(CasePriority::Normal, fast_policy(3));
        task.payload = json!({"blob": "x".repeat(4096)});
        let err = queue.enqueue(task, Duration::ZERO).unwrap_err();
        assert!(matches!(err, QueueError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_aged_low_priority_task_beats_fresh_critical() {
        let settings = QueueSettings {
            aging_threshold: Duration::from_millis(40),
            ..QueueSettings::default()
        };
        let queue = TaskQueue::new(settings, EventPublisher::default());

        let low = task_with(CasePriority::Low, fast_policy(3));
        let low_id = low.task_id;
        queue.enqueue(low, Duration::ZERO).unwrap();

        // Let the low task age through three thresholds, then race it
        // against a freshly enqueued critical task.
        tokio::time::sleep(Duration::from_millis(140)).await;
        queue
            .enqueue(
                task_with(CasePriority::Critical, fast_policy(3)),
                Duration::ZERO,
            )
            .unwrap();

        let first = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.task_id, low_id);
    }

    #[tokio::test]
    async fn test_replay_dead_letter_resets_budget() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(1)), Duration::ZERO)
            .unwrap();
        let leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        queue.nack(leased.task_id, "boom", true).unwrap();
        assert_eq!(queue.peek_dead_letter(10).len(), 1);

        queue.replay_dead_letter(leased.task_id).unwrap();
        assert!(queue.peek_dead_letter(10).is_empty());

        let replayed = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        assert_eq!(replayed.task_id, leased.task_id);
        assert_eq!(replayed.attempt_count, 0);
        assert!(replayed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_withdraw_instance_spares_leased_tasks() {
        let queue = queue();
        let instance_id = Uuid::new_v4();

        let mut leased_task = task_with(CasePriority::Normal, fast_policy(3));
        leased_task.instance_id = instance_id;
        let mut queued_task = task_with(CasePriority::Low, fast_policy(3));
        queued_task.instance_id = instance_id;

        queue.enqueue(leased_task, Duration::ZERO).unwrap();
        queue.enqueue(queued_task, Duration::ZERO).unwrap();
        let leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();

        let withdrawn = queue.withdraw_instance(instance_id);
        assert_eq!(withdrawn, 1);

        // The leased task can still be acked normally.
        queue.ack(leased.task_id).unwrap();
        assert!(queue.dequeue("w", Duration::from_secs(30)).await.is_none());
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Normal, fast_policy(3)), Duration::ZERO)
            .unwrap();
        let leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();
        queue.ack(leased.task_id).unwrap();
        queue.ack(leased.task_id).unwrap();
        assert_eq!(queue.get_task(leased.task_id).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let queue = queue();
        queue
            .enqueue(task_with(CasePriority::Critical, fast_policy(3)), Duration::ZERO)
            .unwrap();
        queue
            .enqueue(
                task_with(CasePriority::Low, fast_policy(3)),
                Duration::from_secs(60),
            )
            .unwrap();
        let _leased = queue.dequeue("w", Duration::from_secs(30)).await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.critical, 0);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.total_tracked, 2);
    }
}
