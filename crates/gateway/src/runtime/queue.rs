//! FIFO task queue over the fast cache.
//!
//! Submission pushes the task id onto the ready list; workers pop from
//! the other end. Admission is checked at dequeue time — a task whose
//! user (or the system) is at its ceiling goes straight back onto the
//! list, which is the backpressure mechanism: rejection is a retry
//! signal, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use tg_cache::{keys, FastCache};
use tg_domain::task::Task;
use tg_domain::Result;

use super::admission::AdmissionController;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptor handed to the worker on a successful dequeue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub user_id: String,
    pub symbol: String,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct QueueService {
    cache: Arc<dyn FastCache>,
    admission: Arc<AdmissionController>,
}

impl QueueService {
    pub fn new(cache: Arc<dyn FastCache>, admission: Arc<AdmissionController>) -> Self {
        Self { cache, admission }
    }

    /// Put a task on the ready list, mirroring its queue-facing fields
    /// into a cache hash for cross-process dequeue.
    pub async fn enqueue(&self, task: &Task) -> Result<()> {
        let key = keys::task(&task.id);
        let mut fields = vec![
            ("id", task.id.clone()),
            ("user", task.user_id.clone()),
            ("symbol", task.symbol.clone()),
            ("status", "queued".to_string()),
            ("enqueued_at", Utc::now().timestamp().to_string()),
        ];
        if let Some(ref batch_id) = task.batch_id {
            fields.push(("batch_id", batch_id.clone()));
        }
        self.cache.hset(&key, &fields).await?;
        self.cache.lpush(keys::READY_LIST, &task.id).await?;
        tracing::info!(task_id = %task.id, user_id = %task.user_id, "task enqueued");
        Ok(())
    }

    /// Pop the next admissible task and claim it for `worker_id`.
    ///
    /// Returns `None` when the queue is empty or the popped task failed
    /// an admission check (it is re-queued; the worker should sleep and
    /// retry).
    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedTask>> {
        let Some(task_id) = self.cache.rpop(keys::READY_LIST).await? else {
            return Ok(None);
        };

        let record = self.cache.hgetall(&keys::task(&task_id)).await?;
        let Some(queued) = parse_queued(&task_id, &record) else {
            tracing::warn!(task_id = %task_id, "dequeued id with no task record, dropping");
            return Ok(None);
        };

        // Soft admission gate: check-then-mark, see AdmissionController.
        let user_ok = self.admission.check_user_limit(&queued.user_id).await?;
        let global_ok = self.admission.check_global_limit().await?;
        if !user_ok || !global_ok {
            self.cache.lpush(keys::READY_LIST, &task_id).await?;
            tracing::debug!(
                task_id = %task_id,
                user_id = %queued.user_id,
                user_ok,
                global_ok,
                "admission ceiling reached, task re-queued"
            );
            return Ok(None);
        }

        self.admission
            .mark_processing(&task_id, &queued.user_id)
            .await?;
        self.admission
            .set_visibility_timeout(&task_id, worker_id)
            .await?;

        self.cache
            .hset(
                &keys::task(&task_id),
                &[
                    ("status", "processing".to_string()),
                    ("worker_id", worker_id.to_string()),
                    ("started_at", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;

        tracing::info!(task_id = %task_id, worker_id = %worker_id, "task dequeued");
        Ok(Some(queued))
    }

    /// Acknowledge a dequeued task exactly once: release the admission
    /// slot, drop the claim, record the outcome.
    pub async fn ack(&self, task_id: &str, user_id: &str, success: bool) -> Result<()> {
        self.admission.unmark_processing(task_id, user_id).await?;
        self.admission.clear_visibility_timeout(task_id).await?;

        let status = if success { "completed" } else { "failed" };
        self.cache
            .hset(
                &keys::task(task_id),
                &[
                    ("status", status.to_string()),
                    ("completed_at", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;
        let outcome_set = if success {
            keys::SET_COMPLETED
        } else {
            keys::SET_FAILED
        };
        self.cache.sadd(outcome_set, task_id).await?;

        tracing::info!(task_id = %task_id, success, "task acknowledged");
        Ok(())
    }

    /// Put an expired claim's task back on the ready list.
    pub async fn requeue(&self, task_id: &str, user_id: &str) -> Result<()> {
        self.admission.unmark_processing(task_id, user_id).await?;
        self.admission.clear_visibility_timeout(task_id).await?;
        self.cache
            .hset(
                &keys::task(task_id),
                &[
                    ("status", "queued".to_string()),
                    ("worker_id", String::new()),
                    ("requeued_at", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;
        self.cache.lpush(keys::READY_LIST, task_id).await?;
        tracing::warn!(task_id = %task_id, "expired claim re-queued");
        Ok(())
    }

    /// Remove a task from the queue on cancellation. Releases the
    /// admission slot when the task was already claimed.
    pub async fn cancel(&self, task_id: &str, user_id: &str) -> Result<()> {
        let record = self.cache.hgetall(&keys::task(task_id)).await?;
        match record.get("status").map(String::as_str) {
            Some("processing") => {
                self.admission.unmark_processing(task_id, user_id).await?;
                self.admission.clear_visibility_timeout(task_id).await?;
            }
            Some("queued") => {
                self.cache.lrem(keys::READY_LIST, task_id).await?;
            }
            _ => {}
        }
        self.cache
            .hset(
                &keys::task(task_id),
                &[
                    ("status", "cancelled".to_string()),
                    ("cancelled_at", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// The queue-facing record for a task, if any.
    pub async fn task_record(&self, task_id: &str) -> Result<HashMap<String, String>> {
        self.cache.hgetall(&keys::task(task_id)).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            queued: self.cache.llen(keys::READY_LIST).await?,
            processing: self.cache.scard(keys::SET_PROCESSING).await?,
            completed: self.cache.scard(keys::SET_COMPLETED).await?,
            failed: self.cache.scard(keys::SET_FAILED).await?,
        })
    }
}

fn parse_queued(task_id: &str, record: &HashMap<String, String>) -> Option<QueuedTask> {
    Some(QueuedTask {
        task_id: task_id.to_string(),
        user_id: record.get("user")?.clone(),
        symbol: record.get("symbol")?.clone(),
        batch_id: record.get("batch_id").cloned(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tg_cache::MemoryCache;
    use tg_domain::task::AnalysisParameters;

    fn service(user_limit: usize, global_limit: usize) -> QueueService {
        let cache: Arc<dyn FastCache> = Arc::new(MemoryCache::new());
        let admission = Arc::new(AdmissionController::new(
            cache.clone(),
            user_limit,
            global_limit,
            Duration::from_secs(300),
        ));
        QueueService::new(cache, admission)
    }

    fn task(user: &str, symbol: &str) -> Task {
        Task::new(user, symbol, AnalysisParameters::default(), 240.0)
    }

    // ── FIFO ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let queue = service(10, 10);
        let first = task("u1", "AAPL");
        let second = task("u1", "MSFT");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let a = queue.dequeue("w1").await.unwrap().unwrap();
        let b = queue.dequeue("w1").await.unwrap().unwrap();
        assert_eq!(a.task_id, first.id);
        assert_eq!(b.task_id, second.id);
        assert!(queue.dequeue("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_carries_descriptor_fields() {
        let queue = service(10, 10);
        let mut t = task("alice", "600519");
        t.batch_id = Some("batch-1".into());
        queue.enqueue(&t).await.unwrap();

        let got = queue.dequeue("w1").await.unwrap().unwrap();
        assert_eq!(got.user_id, "alice");
        assert_eq!(got.symbol, "600519");
        assert_eq!(got.batch_id.as_deref(), Some("batch-1"));

        let record = queue.task_record(&t.id).await.unwrap();
        assert_eq!(record.get("status").map(String::as_str), Some("processing"));
        assert_eq!(record.get("worker_id").map(String::as_str), Some("w1"));
    }

    // ── Admission gating ────────────────────────────────────────────

    #[tokio::test]
    async fn global_limit_gates_dequeue() {
        let queue = service(10, 3);
        let tasks: Vec<Task> = (0..5).map(|i| task(&format!("u{i}"), "AAPL")).collect();
        for t in &tasks {
            queue.enqueue(t).await.unwrap();
        }

        // Exactly three claims succeed immediately.
        let mut claimed = Vec::new();
        for _ in 0..5 {
            if let Some(t) = queue.dequeue("w1").await.unwrap() {
                claimed.push(t);
            }
        }
        assert_eq!(claimed.len(), 3);
        assert_eq!(queue.stats().await.unwrap().queued, 2);

        // Releasing one slot lets one more through.
        let done = &claimed[0];
        queue.ack(&done.task_id, &done.user_id, true).await.unwrap();
        assert!(queue.dequeue("w1").await.unwrap().is_some());
        assert_eq!(queue.stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn user_limit_requeues_task() {
        let queue = service(1, 10);
        let first = task("alice", "AAPL");
        let second = task("alice", "MSFT");
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert!(queue.dequeue("w1").await.unwrap().is_some());
        // Alice is at her ceiling; her second task bounces back.
        assert!(queue.dequeue("w1").await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().queued, 1);

        queue.ack(&first.id, "alice", true).await.unwrap();
        let got = queue.dequeue("w1").await.unwrap().unwrap();
        assert_eq!(got.task_id, second.id);
    }

    // ── Ack ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ack_releases_slot_and_records_outcome() {
        let queue = service(3, 3);
        let t = task("u1", "AAPL");
        queue.enqueue(&t).await.unwrap();
        queue.dequeue("w1").await.unwrap().unwrap();

        queue.ack(&t.id, "u1", false).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);

        let record = queue.task_record(&t.id).await.unwrap();
        assert_eq!(record.get("status").map(String::as_str), Some("failed"));
    }

    // ── Requeue ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn requeue_restores_queued_state() {
        let queue = service(3, 3);
        let t = task("u1", "AAPL");
        queue.enqueue(&t).await.unwrap();
        queue.dequeue("w1").await.unwrap().unwrap();

        queue.requeue(&t.id, "u1").await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing, 0);

        // The task can be claimed again.
        let again = queue.dequeue("w2").await.unwrap().unwrap();
        assert_eq!(again.task_id, t.id);
    }

    // ── Cancel ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_removes_queued_task() {
        let queue = service(3, 3);
        let t = task("u1", "AAPL");
        queue.enqueue(&t).await.unwrap();

        queue.cancel(&t.id, "u1").await.unwrap();
        assert_eq!(queue.stats().await.unwrap().queued, 0);
        assert!(queue.dequeue("w1").await.unwrap().is_none());

        let record = queue.task_record(&t.id).await.unwrap();
        assert_eq!(record.get("status").map(String::as_str), Some("cancelled"));
    }

    #[tokio::test]
    async fn cancel_releases_processing_slot() {
        let queue = service(3, 3);
        let t = task("u1", "AAPL");
        queue.enqueue(&t).await.unwrap();
        queue.dequeue("w1").await.unwrap().unwrap();

        queue.cancel(&t.id, "u1").await.unwrap();
        assert_eq!(queue.stats().await.unwrap().processing, 0);
    }
}
