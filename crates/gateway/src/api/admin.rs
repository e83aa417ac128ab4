//! Admin endpoints — zombie task inspection and forced reclamation.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::runtime::zombies;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ZombieQuery {
    /// Running-time ceiling override, in hours.
    #[serde(default)]
    pub max_running_hours: Option<i64>,
}

impl ZombieQuery {
    fn hours(&self, state: &AppState) -> i64 {
        self.max_running_hours
            .filter(|h| *h > 0)
            .unwrap_or(state.config.retention.zombie_max_running_hours)
    }
}

/// `GET /api/v1/admin/zombie-tasks` — preview without mutating.
pub async fn zombie_tasks(
    State(state): State<AppState>,
    Query(q): Query<ZombieQuery>,
) -> impl IntoResponse {
    let hours = q.hours(&state);
    let zombies = zombies::preview(&state, hours).await;
    Json(serde_json::json!({
        "max_running_hours": hours,
        "total": zombies.len(),
        "tasks": zombies,
    }))
}

/// `POST /api/v1/admin/cleanup-zombies` — force-fail and release.
pub async fn cleanup_zombies(
    State(state): State<AppState>,
    Query(q): Query<ZombieQuery>,
) -> impl IntoResponse {
    let hours = q.hours(&state);
    let report = zombies::sweep(&state, hours).await;
    tracing::info!(
        memory = report.memory_cleaned,
        store = report.store_cleaned,
        "manual zombie cleanup"
    );
    Json(serde_json::json!({
        "max_running_hours": hours,
        "memory_cleaned": report.memory_cleaned,
        "store_cleaned": report.store_cleaned,
        "total": report.total,
    }))
}
