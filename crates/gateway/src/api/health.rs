//! Liveness endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use tg_cache::FastCache;

use crate::state::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_ok = state.cache.llen(tg_cache::keys::READY_LIST).await.is_ok();
    Json(serde_json::json!({
        "status": if cache_ok { "ok" } else { "degraded" },
        "cache_backend": state.cache_backend,
        "cache_reachable": cache_ok,
        "registry_tasks": state.registry.len(),
        "stored_tasks": state.task_store.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
