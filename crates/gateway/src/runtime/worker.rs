//! The worker loop — dequeue, execute, acknowledge.
//!
//! [`start`] spawns the configured number of poll loops, each publishing
//! a **heartbeat** (TTL = 2× the interval, so a crashed worker's key
//! expires on its own), plus two shared background activities:
//!
//! - a **cleanup pass** reclaims expired claims whose worker heartbeat is
//!   gone, behind a token lock so only one process scans at a time;
//! - a **retention pass** runs the zombie sweep and evicts aged terminal
//!   tasks from the registry.
//!
//! The returned handle stops all loops; an in-flight task always finishes
//! and is acknowledged exactly once before its loop exits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tg_cache::{keys, FastCache};
use tg_domain::stage::ProgressUpdate;
use tg_domain::task::TaskStatus;
use tg_progress::ProgressLedger;

use crate::runtime::events::TaskEvent;
use crate::runtime::queue::QueuedTask;
use crate::runtime::zombies;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Running worker loops plus the token that stops them.
pub struct WorkerHandle {
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal every loop to stop after its current task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the graceful drain: loops stop dequeuing but
    /// any in-flight task finishes and is acknowledged first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Start the worker loops.
pub fn start(state: AppState) -> WorkerHandle {
    let cancel = CancellationToken::new();
    let base = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);

    let mut handles = Vec::new();
    let loops = state.config.worker.concurrency.max(1);
    for n in 0..loops {
        handles.push(spawn_poll_loop(
            state.clone(),
            format!("{base}-{n}"),
            cancel.clone(),
        ));
    }
    handles.push(spawn_cleanup_loop(state.clone(), cancel.clone()));
    handles.push(spawn_retention_loop(state, cancel.clone()));

    info!(worker = %base, loops, "worker started");
    WorkerHandle { cancel, handles }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Poll loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_poll_loop(
    state: AppState,
    worker_id: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let current_task: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let heartbeat = spawn_heartbeat(
            state.clone(),
            worker_id.clone(),
            current_task.clone(),
            cancel.clone(),
        );

        let poll = Duration::from_millis(state.config.queue.poll_interval_ms.max(50));
        info!(worker_id = %worker_id, "poll loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match state.queue.dequeue(&worker_id).await {
                Ok(Some(task)) => {
                    *current_task.lock() = Some(task.task_id.clone());
                    process_task(&state, &worker_id, task).await;
                    *current_task.lock() = None;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "dequeue failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        // The heartbeat removes its own key on the way out.
        let _ = heartbeat.await;
        info!(worker_id = %worker_id, "poll loop stopped");
    })
}

fn spawn_heartbeat(
    state: AppState,
    worker_id: String,
    current_task: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.worker.heartbeat_interval_secs.max(1));
        let key = keys::worker_heartbeat(&worker_id);
        loop {
            let payload = serde_json::json!({
                "worker_id": worker_id,
                "timestamp": Utc::now().to_rfc3339(),
                "current_task": current_task.lock().clone(),
                "status": "active",
            });
            if let Err(e) = state
                .cache
                .set(&key, &payload.to_string(), Some(interval * 2))
                .await
            {
                warn!(worker_id = %worker_id, error = %e, "heartbeat write failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        // Remove our own liveness key on a clean shutdown.
        let _ = state.cache.del(&key).await;
        debug!(worker_id = %worker_id, "heartbeat stopped");
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-task processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process_task(state: &AppState, worker_id: &str, queued: QueuedTask) {
    let task_id = queued.task_id.clone();
    info!(task_id = %task_id, symbol = %queued.symbol, worker_id = %worker_id, "processing task");

    let doc = match state.task_store.find_one(&task_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            error!(task_id = %task_id, "no durable document for dequeued task");
            ack(state, &task_id, &queued.user_id, false).await;
            return;
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "durable store read failed");
            ack(state, &task_id, &queued.user_id, false).await;
            return;
        }
    };

    if doc.status.is_terminal() {
        // Cancelled (or reclaimed) between enqueue and claim; just
        // release the slot.
        debug!(task_id = %task_id, status = %doc.status, "task already terminal, releasing claim");
        ack(state, &task_id, &queued.user_id, doc.status == TaskStatus::Completed).await;
        return;
    }

    // This process may not have seen the submission (multi-instance
    // deployment or restart) — make its registry current.
    if !state.registry.contains(&task_id) {
        state.registry.insert(doc.clone());
    }

    // PENDING → RUNNING in both stores.
    let started = Utc::now();
    state.registry.update(&task_id, |t| {
        t.status = TaskStatus::Running;
        t.started_at = Some(started);
        t.worker_id = Some(worker_id.to_string());
        t.message = "analysis running".to_string();
    });
    let _ = state
        .task_store
        .update_one(&task_id, |t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(started);
            t.worker_id = Some(worker_id.to_string());
        })
        .await;
    state.events.emit(
        &task_id,
        TaskEvent::StatusChanged {
            task_id: task_id.clone(),
            status: TaskStatus::Running,
        },
    );

    // The ledger lives on the event loop; the pipeline thread posts
    // progress events over a channel instead of touching shared state.
    let ledger = ProgressLedger::new(&task_id, &doc.parameters);
    let (tx, rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let consumer = tokio::spawn(progress_consumer(
        state.clone(),
        task_id.clone(),
        ledger,
        rx,
    ));

    let pipeline = state.pipeline.clone();
    let symbol = doc.symbol.clone();
    let trade_date = doc
        .parameters
        .analysis_date
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
    let blocking_task_id = task_id.clone();

    // The pipeline call is synchronous and can run for many minutes —
    // it must not starve the event loop.
    let outcome = tokio::task::spawn_blocking(move || {
        let callback = move |update: ProgressUpdate| {
            let _ = tx.send(update);
        };
        pipeline.propagate(&symbol, &trade_date, &callback, &blocking_task_id)
    })
    .await;

    // The sender was dropped with the blocking closure; the consumer
    // drains remaining events and hands the ledger back.
    let ledger = match consumer.await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "progress consumer panicked");
            ProgressLedger::new(&task_id, &doc.parameters)
        }
    };

    let (success, result, error_msg) = match outcome {
        Ok(Ok((_state, decision))) => (true, Some(decision), None),
        Ok(Err(e)) => (false, None, Some(e.to_string())),
        Err(e) => (false, None, Some(format!("pipeline execution aborted: {e}"))),
    };

    finalize(state, &task_id, &queued.user_id, ledger, success, result, error_msg).await;
}

/// Single consumer applying progress events to the ledger, registry,
/// cache, and (on whole-percent changes) the durable store.
async fn progress_consumer(
    state: AppState,
    task_id: String,
    mut ledger: ProgressLedger,
    mut rx: mpsc::UnboundedReceiver<ProgressUpdate>,
) -> ProgressLedger {
    state.progress_store.save(&ledger.snapshot()).await;
    let mut last_persisted: u8 = 0;

    while let Some(update) = rx.recv().await {
        ledger.update(update);
        let snapshot = ledger.snapshot();
        let progress = snapshot.progress_pct.round().clamp(0.0, 100.0) as u8;

        state.registry.update(&task_id, |t| {
            if !t.status.is_terminal() {
                t.progress = progress;
                t.current_step = snapshot.current_step_name.clone();
                t.message = snapshot.last_message.clone();
            }
        });

        state.progress_store.save(&snapshot).await;

        // Durable writes only on whole-percent movement; a missed
        // intermediate write is acceptable, a failed one is not fatal.
        if progress != last_persisted {
            last_persisted = progress;
            let result = state
                .task_store
                .update_one(&task_id, |t| {
                    if !t.status.is_terminal() {
                        t.progress = progress;
                        t.current_step = snapshot.current_step_name.clone();
                        t.message = snapshot.last_message.clone();
                    }
                })
                .await;
            if let Err(e) = result {
                warn!(task_id = %task_id, error = %e, "durable progress write failed");
            }
        }

        state.events.emit(
            &task_id,
            TaskEvent::Progress {
                task_id: task_id.clone(),
                progress: snapshot.progress_pct,
                current_step: snapshot.current_step_name.clone(),
                message: snapshot.last_message.clone(),
            },
        );
    }
    ledger
}

/// Terminal bookkeeping, then the exactly-once acknowledgement.
async fn finalize(
    state: &AppState,
    task_id: &str,
    user_id: &str,
    mut ledger: ProgressLedger,
    success: bool,
    result: Option<serde_json::Value>,
    error_msg: Option<String>,
) {
    if success {
        ledger.mark_completed();
    } else {
        ledger.mark_failed(
            error_msg
                .clone()
                .unwrap_or_else(|| "analysis failed".to_string()),
        );
    }
    state.progress_store.save(&ledger.snapshot()).await;

    let status = if success {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    // Guarded transitions: an external cancel that already made the task
    // terminal wins over this late outcome.
    state
        .registry
        .finish(task_id, status, result.clone(), error_msg.clone());

    let mut batch_id = None;
    let mut store_applied = false;
    let store_result = state
        .task_store
        .update_one(task_id, |t| {
            batch_id = t.batch_id.clone();
            if t.finish(status) {
                store_applied = true;
                if success {
                    t.result = result.clone();
                    t.message = "analysis completed".to_string();
                } else {
                    t.error = error_msg.clone();
                    t.message = error_msg
                        .clone()
                        .unwrap_or_else(|| "analysis failed".to_string());
                }
            }
        })
        .await;
    if let Err(e) = store_result {
        error!(task_id = %task_id, error = %e, "terminal store write failed");
    }

    // Whoever wins the store transition owns the batch counter.
    if store_applied {
        if let Some(ref batch_id) = batch_id {
            let _ = state.batch_store.record_outcome(batch_id, status).await;
        }
    }

    ack(state, task_id, user_id, success).await;

    // Tell subscribers the status that actually stuck.
    let recorded = state
        .registry
        .get(task_id)
        .map(|t| t.status)
        .unwrap_or(status);
    state.events.emit(
        task_id,
        TaskEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: recorded,
        },
    );
    state.events.cleanup(task_id);

    info!(task_id = %task_id, status = %recorded, "task finished");
}

/// Acknowledge a dequeued task. Must run on every processing path.
async fn ack(state: &AppState, task_id: &str, user_id: &str, success: bool) {
    if let Err(e) = state.queue.ack(task_id, user_id, success).await {
        error!(task_id = %task_id, error = %e, "acknowledgement failed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cleanup pass (expired claims)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_cleanup_loop(
    state: AppState,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.queue.cleanup_interval_secs.max(5));
        info!(interval_secs = interval.as_secs(), "claim cleanup loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    match cleanup_pass(&state).await {
                        Ok(0) => {}
                        Ok(n) => warn!(reclaimed = n, "expired claims re-queued"),
                        Err(e) => error!(error = %e, "claim cleanup failed"),
                    }
                }
            }
        }
        info!("claim cleanup loop stopped");
    })
}

/// Scan for expired claims whose worker is dead and re-queue them.
/// Guarded by a token lock so concurrent gateway processes don't race.
pub async fn cleanup_pass(state: &AppState) -> tg_domain::Result<usize> {
    let token = Uuid::new_v4().to_string();
    if !state
        .cache
        .set_nx(keys::CLEANUP_LOCK, &token, Duration::from_secs(60))
        .await?
    {
        return Ok(0);
    }

    let result = reclaim_expired_claims(state).await;

    // Release only our own lock; a timed-out lock taken over by another
    // process must not be deleted from under it.
    let _ = state
        .cache
        .compare_and_delete(keys::CLEANUP_LOCK, &token)
        .await;

    result
}

async fn reclaim_expired_claims(state: &AppState) -> tg_domain::Result<usize> {
    let mut reclaimed = 0;
    for claim in state.admission.expired_claims().await? {
        // A live worker that is simply running long keeps its claim; only
        // a missing heartbeat marks a crash.
        let heartbeat = state
            .cache
            .get(&keys::worker_heartbeat(&claim.worker_id))
            .await?;
        if heartbeat.is_some() {
            continue;
        }

        let record = state.queue.task_record(&claim.task_id).await?;
        let Some(user_id) = record.get("user").cloned() else {
            // No queue record left — just drop the stale claim.
            state
                .admission
                .clear_visibility_timeout(&claim.task_id)
                .await?;
            continue;
        };

        state.queue.requeue(&claim.task_id, &user_id).await?;
        let _ = state
            .task_store
            .update_one(&claim.task_id, |t| {
                if !t.status.is_terminal() {
                    t.status = TaskStatus::Pending;
                    t.worker_id = None;
                    t.message = "re-queued after worker crash".to_string();
                }
            })
            .await;
        warn!(
            task_id = %claim.task_id,
            worker_id = %claim.worker_id,
            "claim expired with dead worker, task re-queued"
        );
        reclaimed += 1;
    }
    Ok(reclaimed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retention pass (zombie sweep + registry eviction)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_retention_loop(
    state: AppState,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.retention.sweep_interval_secs.max(10));
        info!(interval_secs = interval.as_secs(), "retention loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let report = zombies::sweep(
                        &state,
                        state.config.retention.zombie_max_running_hours,
                    )
                    .await;
                    if report.total > 0 {
                        debug!(total = report.total, "zombie sweep done");
                    }

                    let evicted = state.registry.evict_terminal(chrono::Duration::hours(
                        state.config.retention.max_task_age_hours,
                    ));
                    for task_id in &evicted {
                        state.progress_store.remove(task_id).await;
                    }
                    if !evicted.is_empty() {
                        info!(evicted = evicted.len(), "aged terminal tasks evicted");
                    }
                }
            }
        }
        info!("retention loop stopped");
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use tg_domain::task::{AnalysisParameters, Task};
    use tg_domain::Error;

    struct FailingPipeline;

    impl crate::runtime::pipeline::AnalysisPipeline for FailingPipeline {
        fn propagate(
            &self,
            _symbol: &str,
            _trade_date: &str,
            progress: crate::runtime::pipeline::ProgressCallback<'_>,
            _task_id: &str,
        ) -> tg_domain::Result<(serde_json::Value, serde_json::Value)> {
            progress(ProgressUpdate::Percent(30.0));
            Err(Error::Pipeline("model provider unreachable".into()))
        }
    }

    async fn submit(state: &crate::state::AppState, user: &str) -> Task {
        let task = Task::new(user, "AAPL", AnalysisParameters::default(), 240.0);
        state.task_store.insert_one(&task).await.unwrap();
        state.registry.insert(task.clone());
        state.queue.enqueue(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn successful_run_completes_everywhere() {
        let (state, _dir) = test_state();
        let task = submit(&state, "u1").await;

        let queued = state.queue.dequeue("w1").await.unwrap().unwrap();
        process_task(&state, "w1", queued).await;

        let in_registry = state.registry.get(&task.id).unwrap();
        assert_eq!(in_registry.status, TaskStatus::Completed);
        assert_eq!(in_registry.progress, 100);
        assert!(in_registry.result.is_some());
        assert!(in_registry.ended_at.is_some());

        let in_store = state.task_store.find_one(&task.id).await.unwrap().unwrap();
        assert_eq!(in_store.status, TaskStatus::Completed);
        assert!(in_store.result.is_some());
        assert!(in_store.error.is_none());

        // Admission slot released, outcome recorded.
        assert!(!state.admission.is_processing(&task.id).await.unwrap());
        let stats = state.queue.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 0);

        // The cached snapshot reports the finished run.
        let snapshot = state.progress_store.load(&task.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert!((snapshot.progress_pct - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pipeline_failure_marks_failed_once() {
        let (mut state, _dir) = test_state();
        state.pipeline = Arc::new(FailingPipeline);
        let task = submit(&state, "u1").await;

        let queued = state.queue.dequeue("w1").await.unwrap().unwrap();
        process_task(&state, "w1", queued).await;

        let in_store = state.task_store.find_one(&task.id).await.unwrap().unwrap();
        assert_eq!(in_store.status, TaskStatus::Failed);
        assert!(in_store
            .error
            .as_deref()
            .unwrap()
            .contains("model provider unreachable"));
        assert!(in_store.result.is_none());

        // Partial progress preserved for diagnostics.
        let snapshot = state.progress_store.load(&task.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!((snapshot.progress_pct - 30.0).abs() < 1e-9);

        let stats = state.queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn cancel_wins_over_late_completion() {
        let (state, _dir) = test_state();
        let task = submit(&state, "u1").await;

        let queued = state.queue.dequeue("w1").await.unwrap().unwrap();

        // Cancel lands while the pipeline is "running" (before the
        // worker writes its outcome).
        state
            .registry
            .finish(&task.id, TaskStatus::Cancelled, None, None);
        state
            .task_store
            .update_one(&task.id, |t| {
                t.finish(TaskStatus::Cancelled);
            })
            .await
            .unwrap();

        process_task(&state, "w1", queued).await;

        // The late success did not overwrite the cancel.
        assert_eq!(
            state.registry.get(&task.id).unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            state
                .task_store
                .find_one(&task.id)
                .await
                .unwrap()
                .unwrap()
                .status,
            TaskStatus::Cancelled
        );
        // The slot was still released.
        assert!(!state.admission.is_processing(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_requeues_only_dead_workers_tasks() {
        let (state, _dir) = test_state();
        let task = submit(&state, "u1").await;
        state.queue.dequeue("w-dead").await.unwrap().unwrap();

        // Force the claim to look expired.
        state
            .cache
            .hset(
                &keys::visibility(&task.id),
                &[("timeout_at", (Utc::now().timestamp() - 10).to_string())],
            )
            .await
            .unwrap();

        // While the worker heartbeat exists, the claim is honored.
        state
            .cache
            .set(
                &keys::worker_heartbeat("w-dead"),
                "{}",
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(cleanup_pass(&state).await.unwrap(), 0);

        // Heartbeat gone → the task goes back to the queue.
        state
            .cache
            .del(&keys::worker_heartbeat("w-dead"))
            .await
            .unwrap();
        assert_eq!(cleanup_pass(&state).await.unwrap(), 1);

        let stats = state.queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing, 0);

        let doc = state.task_store.find_one(&task.id).await.unwrap().unwrap();
        assert_eq!(doc.status, TaskStatus::Pending);
        assert!(doc.message.contains("re-queued"));
    }

    #[tokio::test]
    async fn cleanup_lock_excludes_concurrent_scans() {
        let (state, _dir) = test_state();

        // Another process holds the lock.
        assert!(state
            .cache
            .set_nx(keys::CLEANUP_LOCK, "someone-else", Duration::from_secs(60))
            .await
            .unwrap());

        let task = submit(&state, "u1").await;
        state.queue.dequeue("w-dead").await.unwrap().unwrap();
        state
            .cache
            .hset(
                &keys::visibility(&task.id),
                &[("timeout_at", (Utc::now().timestamp() - 10).to_string())],
            )
            .await
            .unwrap();

        // Locked out: nothing reclaimed, foreign lock untouched.
        assert_eq!(cleanup_pass(&state).await.unwrap(), 0);
        assert_eq!(
            state.cache.get(keys::CLEANUP_LOCK).await.unwrap().as_deref(),
            Some("someone-else")
        );
    }
}
