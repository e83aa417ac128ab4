pub mod admin;
pub mod analysis;
pub mod health;
pub mod queue;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/analysis", post(analysis::submit))
        .route("/api/v1/analysis/batch", post(analysis::submit_batch))
        .route("/api/v1/analysis/tasks", get(analysis::list_tasks))
        .route("/api/v1/analysis/batch/:batch_id", get(analysis::get_batch))
        .route("/api/v1/analysis/:task_id/status", get(analysis::get_status))
        .route("/api/v1/analysis/:task_id/events", get(analysis::task_events_sse))
        .route("/api/v1/analysis/:task_id", delete(analysis::cancel))
        .route("/api/v1/queue/status", get(queue::status))
        .route("/api/v1/admin/zombie-tasks", get(admin::zombie_tasks))
        .route("/api/v1/admin/cleanup-zombies", post(admin::cleanup_zombies))
}

/// The submitting user, taken from the `x-user-id` header. The gateway
/// sits behind an authenticating proxy; an absent header maps to the
/// anonymous user.
pub fn user_id_from_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}
