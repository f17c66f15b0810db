//! # Coalesce Core
//!
//! Request deduplication and batching for async services.
//!
//! This crate provides:
//!
//! - **[`coordinator`]**: [`Coordinator`], which runs at most one execution per
//!   request key at a time, shares its outcome with every concurrent caller,
//!   and folds distinct keys into batched executions.
//!
//! - **[`cache`]**: TTL result cache with lazy expiry and a periodic sweeper.
//!
//! - **[`types`]**: request descriptors and their canonical keys.
//!
//! - **[`metrics`]**: statistics counters mirrored to Prometheus.
//!
//! - **[`config`]**: layered application configuration.
//!
//! ## Request Flow
//!
//! ```text
//! execute(descriptor, executor)
//!       │
//!       ▼
//! ┌───────────────┐
//! │ RequestKey    │  canonical JSON, SHA-256 by default
//! └──────┬────────┘
//!        │
//!        ▼
//! ┌───────────────┐
//! │ In flight?    │ ─── yes ──► await shared outcome
//! └──────┬────────┘
//!        │ no
//!        ▼
//! ┌───────────────┐
//! │ Cached?       │ ─── yes ──► cached value
//! └──────┬────────┘
//!        │ no
//!        ▼
//! ┌───────────────┐
//! │ Capacity?     │ ─── full ──► CapacityExceeded
//! └──────┬────────┘
//!        │
//!        ▼
//!   spawn executor ──► cache on success ──► release every caller
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod types;
pub mod utils;

pub use coordinator::{CoalesceError, Coordinator, DedupConfig, DedupConfigError};
pub use metrics::StatsSnapshot;
pub use types::{RequestDescriptor, RequestKey};
