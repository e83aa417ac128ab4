//! Analysis task endpoints — submit, batch, list, status, cancel, and
//! the per-task SSE event stream.
//!
//! - `POST   /api/v1/analysis`                — submit one task
//! - `POST   /api/v1/analysis/batch`          — submit a batch
//! - `GET    /api/v1/analysis/tasks`          — list (user_id, status)
//! - `GET    /api/v1/analysis/:id/status`     — reconciled status view
//! - `DELETE /api/v1/analysis/:id`            — cancel
//! - `GET    /api/v1/analysis/:id/events`     — SSE progress stream
//! - `GET    /api/v1/analysis/batch/:id`      — batch status

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use tg_domain::task::{validate_symbol, AnalysisParameters, Batch, Task, TaskStatus};
use tg_progress::estimate_total_secs;

use crate::api::user_id_from_headers;
use crate::runtime::events::TaskEvent;
use crate::runtime::reconcile;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / query shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub symbol: String,
    #[serde(default)]
    pub parameters: Option<AnalysisParameters>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub parameters: Option<AnalysisParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> impl IntoResponse {
    let user_id = user_id_from_headers(&headers);

    // Reject clearly invalid input before any state is created.
    if let Err(e) = validate_symbol(&body.symbol) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response();
    }

    let params = body.parameters.unwrap_or_default();
    let task = Task::new(
        &user_id,
        body.symbol.trim(),
        params.clone(),
        estimate_total_secs(&params),
    );

    match create_and_enqueue(&state, task).await {
        Ok(task_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "task_id": task_id,
                "status": "pending",
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "task submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Durable document and registry entry are created together, then the
/// task enters the ready queue.
async fn create_and_enqueue(state: &AppState, task: Task) -> tg_domain::Result<String> {
    state.task_store.insert_one(&task).await?;
    state.registry.insert(task.clone());
    state.queue.enqueue(&task).await?;
    Ok(task.id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/analysis/batch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitBatchRequest>,
) -> impl IntoResponse {
    let user_id = user_id_from_headers(&headers);

    if body.symbols.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "symbols must not be empty" })),
        )
            .into_response();
    }
    let invalid: Vec<&String> = body
        .symbols
        .iter()
        .filter(|s| validate_symbol(s).is_err())
        .collect();
    if !invalid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "unrecognized symbols",
                "symbols": invalid,
            })),
        )
            .into_response();
    }

    let params = body.parameters.unwrap_or_default();
    let mut batch = Batch::new(&user_id, body.symbols.len());

    for symbol in &body.symbols {
        let mut task = Task::new(
            &user_id,
            symbol.trim(),
            params.clone(),
            estimate_total_secs(&params),
        );
        task.batch_id = Some(batch.id.clone());
        let task_id = task.id.clone();
        if let Err(e) = create_and_enqueue(&state, task).await {
            tracing::error!(symbol = %symbol, error = %e, "batch member submission failed");
            continue;
        }
        batch.task_ids.push(task_id);
    }
    batch.submitted = batch.task_ids.len();

    if let Err(e) = state.batch_store.insert_one(&batch).await {
        tracing::error!(batch_id = %batch.id, error = %e, "batch record write failed");
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "batch_id": batch.id,
            "submitted": batch.submitted,
            "task_ids": batch.task_ids,
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/analysis/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListTasksQuery>,
) -> impl IntoResponse {
    let status = q.status.as_deref().and_then(TaskStatus::parse);
    let limit = q.limit.min(200);

    let (tasks, total) =
        reconcile::list(&state, q.user_id.as_deref(), status, limit, q.offset).await;

    Json(serde_json::json!({
        "tasks": tasks,
        "total": total,
        "limit": limit,
        "offset": q.offset,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/analysis/:task_id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match reconcile::get_status(&state, &task_id).await {
        Some(view) => Json(serde_json::json!(view)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "task not found" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /api/v1/analysis/:task_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let Some(view) = reconcile::get_status(&state, &task_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "task not found" })),
        )
            .into_response();
    };

    if view.status.is_terminal() {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "task is already in a terminal state",
                "task_id": task_id,
                "cancelled": false,
            })),
        )
            .into_response();
    }

    // Cancellation is cooperative: the terminal status is recorded now
    // and wins over any late pipeline outcome; an in-flight pipeline
    // thread is not interrupted.
    state
        .registry
        .finish(&task_id, TaskStatus::Cancelled, None, None);

    let mut batch_id = None;
    let mut store_applied = false;
    let _ = state
        .task_store
        .update_one(&task_id, |t| {
            batch_id = t.batch_id.clone();
            if t.finish(TaskStatus::Cancelled) {
                t.message = "cancelled by user".to_string();
                store_applied = true;
            }
        })
        .await;
    if store_applied {
        if let Some(ref batch_id) = batch_id {
            let _ = state
                .batch_store
                .record_outcome(batch_id, TaskStatus::Cancelled)
                .await;
        }
    }

    if let Err(e) = state.queue.cancel(&task_id, &view.user_id).await {
        tracing::warn!(task_id = %task_id, error = %e, "queue-side cancel failed");
    }

    // Drop the stale running snapshot so cross-process readers see the
    // terminal state.
    state.progress_store.remove(&task_id).await;

    state.events.emit(
        &task_id,
        TaskEvent::StatusChanged {
            task_id: task_id.clone(),
            status: TaskStatus::Cancelled,
        },
    );
    state.events.cleanup(&task_id);

    tracing::info!(task_id = %task_id, "task cancelled");
    Json(serde_json::json!({
        "task_id": task_id,
        "cancelled": true,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/analysis/batch/:batch_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> impl IntoResponse {
    match state.batch_store.find_one(&batch_id).await {
        Ok(Some(batch)) => Json(serde_json::json!({
            "batch_id": batch.id,
            "user_id": batch.user_id,
            "submitted": batch.submitted,
            "completed": batch.completed,
            "failed": batch.failed,
            "cancelled": batch.cancelled,
            "progress": batch.progress(),
            "settled": batch.is_settled(),
            "created_at": batch.created_at,
            "task_ids": batch.task_ids,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "batch not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/analysis/:task_id/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn task_events_sse(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let Some(view) = reconcile::get_status(&state, &task_id).await else {
        let stream = futures_util::stream::once(async {
            Ok::<_, std::convert::Infallible>(
                Event::default()
                    .event("error")
                    .data(r#"{"error":"task not found"}"#),
            )
        });
        return Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response();
    };

    // Already settled: send the final view and close.
    if view.status.is_terminal() {
        let data = serde_json::to_string(&view).unwrap_or_default();
        let stream = futures_util::stream::once(async move {
            Ok::<_, std::convert::Infallible>(Event::default().event("task.snapshot").data(data))
        });
        return Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response();
    }

    let rx = state.events.subscribe(&task_id);
    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    mut rx: tokio::sync::broadcast::Receiver<TaskEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    let kind = event.kind();
                    yield Ok(Event::default().event(kind).data(data));
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(Event::default().event("warning").data(msg));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
