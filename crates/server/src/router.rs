//! Route handlers and application assembly.

use crate::{
    admin::{create_admin_router, AdminState},
    middleware::{create_deduplication_middleware, DedupCoordinator, DedupState},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use coalesce_core::config::AppConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

/// GET /health
pub async fn handle_health() -> &'static str {
    "ok"
}

/// GET /metrics
///
/// Renders the Prometheus recorder, or 404 when metrics are disabled.
pub async fn handle_metrics(State(handle): State<Option<PrometheusHandle>>) -> impl IntoResponse {
    match handle {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain; charset=utf-8")],
            "metrics disabled".to_string(),
        ),
    }
}

/// GET /api/{*path}
///
/// Sample origin served behind the dedup middleware.
pub async fn handle_echo(Path(path): Path<String>) -> impl IntoResponse {
    Json(serde_json::json!({ "path": format!("/{path}") }))
}

/// Assembles the full application: deduplicated `/api` routes, the admin
/// surface, `/health` and `/metrics`.
pub fn create_app(
    coordinator: DedupCoordinator,
    config: &AppConfig,
    prometheus: Option<PrometheusHandle>,
) -> Router {
    let api = Router::new().route("/api/{*path}", get(handle_echo));
    let api = create_deduplication_middleware(
        api,
        DedupState::new(coordinator.clone(), config.server.max_body_bytes),
    );

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(prometheus);

    public
        .merge(create_admin_router(AdminState::new(coordinator)))
        .merge(api)
        .layer(TraceLayer::new_for_http())
}
