//! Status reconciliation across the three state sources.
//!
//! Freshness order: in-process registry (most current, same-process
//! only) > fast-cache progress snapshot (cross-process, slightly stale)
//! > durable document (always available, may lag one update interval).
//! The merge is a pure function over three optional snapshots; fields
//! come from the freshest source that has them, and the merged progress
//! percentage never regresses below any present value.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tg_domain::task::{AnalysisParameters, Task, TaskStatus};
use tg_progress::{ProgressSnapshot, Stage};

use crate::state::AppState;
use crate::store::TaskFilter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The one coherent per-task view served to callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub task_id: String,
    pub user_id: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub estimated_total_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Stage>>,
    pub parameters: AnalysisParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Merge the three sources into one view. `None` when no source knows
/// the task.
pub fn merge(
    memory: Option<Task>,
    cache: Option<ProgressSnapshot>,
    store: Option<Task>,
) -> Option<StatusView> {
    // Identity and durable fields come from the freshest Task record.
    let base = memory.as_ref().or(store.as_ref())?.clone();

    // Status: freshest source that has one — except that a terminal
    // status recorded anywhere is immutable and beats a stale
    // non-terminal view from a fresher source (e.g. a cancel written to
    // the durable store while a cache snapshot still says running).
    let statuses = [
        memory.as_ref().map(|t| t.status),
        cache.as_ref().map(|s| s.status),
        store.as_ref().map(|t| t.status),
    ];
    let status = statuses
        .into_iter()
        .flatten()
        .find(|s| s.is_terminal())
        .or_else(|| statuses.into_iter().flatten().next())
        .unwrap_or(base.status);

    // Progress never regresses across the merge: every source is
    // individually monotone but their write moments differ, so the
    // merged value is the highest any source has seen.
    let mut progress = 0.0_f64;
    for candidate in [
        memory.as_ref().map(|t| t.progress as f64),
        cache.as_ref().map(|s| s.progress_pct),
        store.as_ref().map(|t| t.progress as f64),
    ]
    .into_iter()
    .flatten()
    {
        progress = progress.max(candidate);
    }

    // Step label and message: the cache snapshot carries the richest
    // wording; registry/store labels fall back progressively.
    let current_step = cache
        .as_ref()
        .map(|s| s.current_step_name.clone())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            memory
                .as_ref()
                .map(|t| t.current_step.clone())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| base.current_step.clone());

    let message = memory
        .as_ref()
        .map(|t| t.message.clone())
        .filter(|m| !m.is_empty())
        .or_else(|| {
            cache
                .as_ref()
                .map(|s| s.last_message.clone())
                .filter(|m| !m.is_empty())
        })
        .unwrap_or_else(|| base.message.clone());

    // Clock estimates: prefer the snapshot (already refreshed); derive
    // from the task record otherwise.
    let (elapsed_secs, remaining_secs, estimated_total_secs) = match cache.as_ref() {
        Some(snapshot) => (
            snapshot.elapsed_secs,
            snapshot.remaining_secs,
            snapshot.estimated_total_secs,
        ),
        None => {
            let now = Utc::now();
            let elapsed = match (base.started_at, base.ended_at) {
                (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
                (Some(start), None) => (now - start).num_milliseconds().max(0) as f64 / 1000.0,
                _ => 0.0,
            };
            let estimate = base.estimated_duration_secs;
            let remaining = if status.is_terminal() {
                0.0
            } else {
                (estimate - elapsed).max(0.0)
            };
            (elapsed, remaining, estimate)
        }
    };

    let error = memory
        .as_ref()
        .and_then(|t| t.error.clone())
        .or_else(|| cache.as_ref().and_then(|s| s.failure_reason.clone()))
        .or_else(|| store.as_ref().and_then(|t| t.error.clone()));

    let result = memory
        .as_ref()
        .and_then(|t| t.result.clone())
        .or_else(|| store.as_ref().and_then(|t| t.result.clone()));

    Some(StatusView {
        task_id: base.id,
        user_id: base.user_id,
        symbol: base.symbol,
        batch_id: base.batch_id,
        status,
        progress,
        current_step,
        message,
        created_at: base.created_at,
        started_at: memory
            .as_ref()
            .and_then(|t| t.started_at)
            .or(base.started_at),
        ended_at: memory.as_ref().and_then(|t| t.ended_at).or(base.ended_at),
        elapsed_secs,
        remaining_secs,
        estimated_total_secs,
        steps: cache.map(|s| s.steps),
        parameters: base.parameters,
        result,
        error,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reconciled status for one task, or `None` when no source knows it.
pub async fn get_status(state: &AppState, task_id: &str) -> Option<StatusView> {
    let memory = state.registry.get(task_id);
    let cache = state.progress_store.load(task_id).await;
    let store = match state.task_store.find_one(task_id).await {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "durable store read failed");
            None
        }
    };
    merge(memory, cache, store)
}

/// List tasks by merging the registry and the durable store,
/// de-duplicating by id. For RUNNING tasks the registry copy's progress
/// fields win — only it reflects same-process live updates immediately.
pub async fn list(
    state: &AppState,
    user_id: Option<&str>,
    status: Option<TaskStatus>,
    limit: usize,
    offset: usize,
) -> (Vec<StatusView>, usize) {
    let filter = TaskFilter {
        user_id: user_id.map(String::from),
        status,
        batch_id: None,
    };
    // Pull everything matching, merge, then paginate the union.
    let stored = match state.task_store.find(&filter, usize::MAX, 0).await {
        Ok((docs, _)) => docs,
        Err(e) => {
            tracing::warn!(error = %e, "durable store list failed");
            Vec::new()
        }
    };
    let (in_memory, _) = state.registry.list(user_id, status, usize::MAX, 0);

    let mut views: Vec<StatusView> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for task in &in_memory {
        if let Some(view) = merge(Some(task.clone()), None, None) {
            seen.insert(task.id.clone());
            views.push(view);
        }
    }
    for task in stored {
        if seen.contains(&task.id) {
            continue;
        }
        if let Some(view) = merge(state.registry.get(&task.id), None, Some(task)) {
            views.push(view);
        }
    }

    views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = views.len();
    let page = views.into_iter().skip(offset).take(limit).collect();
    (page, total)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
