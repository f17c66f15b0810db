//! Coordinator endpoint handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::info;

use crate::admin::AdminState;

/// GET /admin/dedup/stats
///
/// Returns the coordinator's counters and live gauges, plus server uptime.
pub async fn get_stats(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.coordinator.get_stats();

    let mut body = serde_json::to_value(&stats).unwrap_or_default();
    if let Some(fields) = body.as_object_mut() {
        fields.insert("uptimeSeconds".to_string(), state.start_time.elapsed().as_secs().into());
    }

    Json(body)
}

/// DELETE /admin/dedup/cache
///
/// Drops every cached response. In-flight executions are unaffected.
pub async fn clear_cache(State(state): State<AdminState>) -> impl IntoResponse {
    let cached = state.coordinator.get_stats().cached;
    state.coordinator.clear();
    info!(cleared = cached, "dedup cache cleared via admin API");

    StatusCode::NO_CONTENT
}
