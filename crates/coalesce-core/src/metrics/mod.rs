//! # Coordinator Statistics
//!
//! Dual-path counters for the coordinator.
//!
//! ## Hot Path (Lock-Free)
//!
//! [`DedupStats`] holds plain atomics that every `execute`/`execute_batch`
//! call bumps with `Relaxed` ordering. Reads through [`DedupStats::snapshot`]
//! may be momentarily inconsistent across fields but never block writers.
//!
//! ## Export Path
//!
//! Every increment is mirrored into the `metrics` facade. Without an installed
//! recorder these calls are no-ops; the server binary installs a Prometheus
//! recorder via [`init_prometheus_recorder`] and renders it at `/metrics`.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder once and returns its render handle.
///
/// If another recorder is already installed globally, a detached recorder is
/// built instead so callers still get a working handle.
pub fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to install global Prometheus recorder, using detached recorder"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Monotonic operation counters shared by the single-flight core and the
/// batch aggregator.
#[derive(Debug, Default)]
pub struct DedupStats {
    total: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
}

impl DedupStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One external `execute` / `execute_batch` call.
    pub fn record_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        counter!("coalesce_requests_total").increment(1);
    }

    /// A call served by an in-flight entry or a fresh cached result.
    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
        counter!("coalesce_deduplicated_total").increment(1);
    }

    pub fn record_completed(&self, count: u64) {
        self.completed.fetch_add(count, Ordering::Relaxed);
        counter!("coalesce_completed_total").increment(count);
    }

    pub fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
        counter!("coalesce_failed_total").increment(count);
    }

    /// Cache entries reaped by the periodic sweep.
    pub fn record_expired(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.expired.fetch_add(count, Ordering::Relaxed);
        counter!("coalesce_expired_total").increment(count);
    }

    /// Captures the counters together with the live table gauges supplied by
    /// the coordinator.
    #[must_use]
    pub fn snapshot(&self, pending: usize, cached: usize, open_batches: usize) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let deduplicated = self.deduplicated.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let deduplication_rate =
            if total > 0 { deduplicated as f64 / total as f64 } else { 0.0 };

        #[allow(clippy::cast_precision_loss)]
        let (pending_gauge, cached_gauge) = (pending as f64, cached as f64);
        gauge!("coalesce_pending_entries").set(pending_gauge);
        gauge!("coalesce_cached_entries").set(cached_gauge);

        StatsSnapshot {
            total,
            deduplicated,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            pending,
            cached,
            open_batches,
            deduplication_rate,
        }
    }
}

/// Point-in-time view returned by `Coordinator::get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    /// Open in-flight entries.
    pub pending: usize,
    /// Cache entries, including expired ones the sweep has not reaped yet.
    pub cached: usize,
    pub open_batches: usize,
    /// `deduplicated / total`, or `0.0` before the first call.
    pub deduplication_rate: f64,
}
