//! Queue status endpoint — per-user slots plus system-wide counters.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};

use crate::api::user_id_from_headers;
use crate::state::AppState;

/// `GET /api/v1/queue/status`
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user_id = user_id_from_headers(&headers);

    let slots = match state.admission.user_slots(&user_id).await {
        Ok(slots) => serde_json::json!(slots),
        Err(e) => {
            tracing::warn!(error = %e, "user slot read failed");
            serde_json::Value::Null
        }
    };
    let stats = match state.queue.stats().await {
        Ok(stats) => serde_json::json!(stats),
        Err(e) => {
            tracing::warn!(error = %e, "queue stats read failed");
            serde_json::Value::Null
        }
    };

    Json(serde_json::json!({
        "user_id": user_id,
        "user": slots,
        "queue": stats,
        "registry": state.registry.stats(),
    }))
}
