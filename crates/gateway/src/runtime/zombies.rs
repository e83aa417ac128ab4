//! Zombie reclamation — the slow, store-based backstop.
//!
//! A task stuck non-terminal past the running ceiling is force-failed
//! with a timeout error, in the registry and the durable store, and its
//! admission records are released. This is independent of the fast
//! visibility-timeout path: it catches anything that slipped through,
//! whatever the cause.

use chrono::{Duration, Utc};
use serde::Serialize;

use tg_domain::task::{Task, TaskStatus};

use crate::runtime::events::TaskEvent;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ZombieReport {
    pub memory_cleaned: usize,
    pub store_cleaned: usize,
    pub total: usize,
}

fn timeout_message(max_running_hours: i64) -> String {
    format!("task timed out (running for more than {max_running_hours}h)")
}

/// Force-fail every zombie. Returns per-store counts.
pub async fn sweep(state: &AppState, max_running_hours: i64) -> ZombieReport {
    let message = timeout_message(max_running_hours);

    // Pass 1: the in-process registry. Reclaimed ids are mirrored to the
    // durable store and their admission records released.
    let reclaimed = state.registry.reclaim_zombies(max_running_hours);
    for (task_id, user_id) in &reclaimed {
        release_and_persist(state, task_id, user_id, &message).await;
    }
    let memory_cleaned = reclaimed.len();

    // Pass 2: the durable store, for tasks this process never held (or
    // lost on a restart).
    let cutoff = Utc::now() - Duration::hours(max_running_hours);
    let mut store_cleaned = 0;
    let orphans = state
        .task_store
        .find_non_terminal_older_than(cutoff)
        .await
        .unwrap_or_default();
    for task in orphans {
        release_and_persist(state, &task.id, &task.user_id, &message).await;
        store_cleaned += 1;
    }

    let report = ZombieReport {
        memory_cleaned,
        store_cleaned,
        total: memory_cleaned + store_cleaned,
    };
    if report.total > 0 {
        tracing::warn!(
            memory = report.memory_cleaned,
            store = report.store_cleaned,
            "zombie tasks reclaimed"
        );
    }
    report
}

/// Non-terminal tasks past the ceiling, from both stores, without
/// touching them.
pub async fn preview(state: &AppState, max_running_hours: i64) -> Vec<Task> {
    let cutoff = Utc::now() - Duration::hours(max_running_hours);
    let mut zombies = state.registry.peek_zombies(max_running_hours);
    let mut seen: std::collections::HashSet<String> =
        zombies.iter().map(|t| t.id.clone()).collect();

    for task in state
        .task_store
        .find_non_terminal_older_than(cutoff)
        .await
        .unwrap_or_default()
    {
        if seen.insert(task.id.clone()) {
            zombies.push(task);
        }
    }
    zombies
}

/// Persist the forced failure, release admission records, drop the stale
/// progress snapshot, and notify subscribers. Every step is best-effort.
async fn release_and_persist(state: &AppState, task_id: &str, user_id: &str, message: &str) {
    let mut batch_id = None;
    let store_result = state
        .task_store
        .update_one(task_id, |task| {
            batch_id = task.batch_id.clone();
            if task.finish(TaskStatus::Failed) {
                task.error = Some(message.to_string());
                task.message = message.to_string();
            }
        })
        .await;
    if let Err(e) = store_result {
        tracing::warn!(task_id = %task_id, error = %e, "zombie store write failed");
    }

    if let Err(e) = state.admission.unmark_processing(task_id, user_id).await {
        tracing::warn!(task_id = %task_id, error = %e, "zombie admission release failed");
    }
    if let Err(e) = state.admission.clear_visibility_timeout(task_id).await {
        tracing::debug!(task_id = %task_id, error = %e, "zombie claim clear failed");
    }

    // The cache snapshot would otherwise keep reporting a running state.
    state.progress_store.remove(task_id).await;

    if let Some(batch_id) = batch_id {
        let _ = state
            .batch_store
            .record_outcome(&batch_id, TaskStatus::Failed)
            .await;
    }

    state.events.emit(
        task_id,
        TaskEvent::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
        },
    );
    state.events.cleanup(task_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
