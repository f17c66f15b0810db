//! HTTP middleware components for the server.
//!
//! Axum adapters that put the `coalesce_core` coordinator in front of
//! downstream handlers. HTTP concerns (keys, buffering, status codes) live
//! here; deduplication itself is delegated to the core library.

pub mod dedup;

pub use dedup::{
    create_deduplication_middleware, dedup_key, dedup_middleware, CapturedResponse,
    DedupCoordinator, DedupState, X_DEDUP,
};
