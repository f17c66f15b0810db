//! Admin API module.
//!
//! Read-only introspection and cache management for the coordinator that
//! backs the dedup middleware. Mounted on the main listener under `/admin`
//! and never deduplicated itself.

pub mod handlers;

use crate::middleware::DedupCoordinator;
use axum::{
    routing::{delete, get},
    Router,
};
use std::time::Instant;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Coordinator whose statistics and cache are exposed.
    pub coordinator: DedupCoordinator,

    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AdminState {
    #[must_use]
    pub fn new(coordinator: DedupCoordinator) -> Self {
        Self { coordinator, start_time: Instant::now() }
    }
}

/// Creates the admin router.
pub fn create_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/dedup/stats", get(handlers::dedup::get_stats))
        .route("/admin/dedup/cache", delete(handlers::dedup::clear_cache))
        .with_state(state)
}
