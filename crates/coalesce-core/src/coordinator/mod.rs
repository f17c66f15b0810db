//! Deduplicating / batching execution coordinator.
//!
//! The coordinator guarantees at most one real execution per request key at a
//! time, shares that execution's outcome with every concurrent caller of the
//! same key, optionally folds distinct keys into one batched execution, and
//! keeps successful outcomes for a bounded TTL.
//!
//! # Sub-modules
//!
//! - `single_flight`: [`Coordinator::execute`] and the pending-entry table
//! - `batch`: [`Coordinator::execute_batch`] and the open batch-group table
//! - `config`: [`DedupConfig`] and its validation
//! - `errors`: [`CoalesceError`]
//!
//! # Shared State
//!
//! ```text
//! ┌──────────────────────── Coordinator (Arc<Inner>) ────────────────────────┐
//! │                                                                          │
//! │  pending: DashMap<RequestKey, PendingEntry>   ◄── execute                │
//! │  batches: Mutex<HashMap<batch key, BatchGroup>> ◄── execute_batch        │
//! │  cache:   ResultCache  ◄── written by both, swept by the background task │
//! │  stats:   DedupStats   ◄── bumped by both                                │
//! │                                                                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking Discipline
//!
//! Every check-and-insert on a shared table happens inside one critical
//! section: the `DashMap` shard lock for pending entries, the batch mutex for
//! groups. No lock is ever held across an `.await`, and executors always run
//! in spawned tasks outside every lock, so unrelated keys never serialize.

pub mod batch;
pub mod config;
pub mod errors;
pub mod single_flight;

pub use config::{DedupConfig, DedupConfigError};
pub use errors::CoalesceError;

use crate::{
    cache::{background::run_sweeper, ResultCache},
    metrics::{DedupStats, StatsSnapshot},
    types::{RequestDescriptor, RequestKey},
};
use batch::{BatchGroup, SealReason};
use dashmap::DashMap;
use parking_lot::Mutex;
use single_flight::PendingEntry;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::broadcast;
use tracing::debug;

/// Handle to a coordinator.
///
/// # Cloning
///
/// Cloning is an `Arc` bump; all clones share the same tables, cache and
/// counters.
///
/// # Type Parameters
///
/// * `V` - the value an executor produces; cloned out to every caller
/// * `E` - the executor's error type; cloned out to every caller unchanged
pub struct Coordinator<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for Coordinator<V, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<V, E> std::fmt::Debug for Coordinator<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.pending_count.load(Ordering::Relaxed))
            .field("cached", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}

pub(crate) struct Inner<V, E> {
    pub(crate) config: DedupConfig,
    pub(crate) pending: DashMap<RequestKey, PendingEntry<V, E>>,
    /// Mirrors `pending.len()`; admission is reserved on this counter with a
    /// CAS so `max_pending` holds across shards.
    pub(crate) pending_count: AtomicUsize,
    pub(crate) cache: ResultCache<V>,
    pub(crate) stats: Arc<DedupStats>,
    pub(crate) batches: Mutex<HashMap<String, BatchGroup<V, E>>>,
    pub(crate) next_generation: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    sweeper_started: AtomicBool,
    stopped: AtomicBool,
}

impl<V, E> Drop for Inner<V, E> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl<V, E> Coordinator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator. No background task is started until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`DedupConfigError`] if `config` fails validation.
    pub fn new(config: DedupConfig) -> Result<Self, DedupConfigError> {
        config.validate()?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                pending_count: AtomicUsize::new(0),
                cache: ResultCache::new(),
                stats: Arc::new(DedupStats::new()),
                batches: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutdown_tx,
                sweeper_started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Spawns the periodic expiry sweep. Idempotent; a no-op after [`stop`](Self::stop).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::Acquire) ||
            self.inner.sweeper_started.swap(true, Ordering::AcqRel)
        {
            return;
        }

        tokio::spawn(run_sweeper(
            self.inner.cache.clone(),
            Arc::clone(&self.inner.stats),
            self.inner.config.sweep_interval(),
            self.inner.shutdown_tx.subscribe(),
        ));

        debug!("coordinator background tasks started");
    }

    /// Runs `executor` at most once per concurrent key and shares its outcome.
    ///
    /// See [`single_flight`] for the admission protocol.
    ///
    /// # Errors
    ///
    /// - [`CoalesceError::CapacityExceeded`] when `max_pending` distinct keys are in flight
    /// - [`CoalesceError::Execution`] with the executor's own error
    /// - [`CoalesceError::Abandoned`] if the executor panicked
    pub async fn execute<F, Fut>(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        executor: F,
    ) -> Result<V, CoalesceError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.inner.execute(descriptor.into(), executor).await
    }

    /// Submits one member to the batch group for its batch key.
    ///
    /// See [`batch`] for grouping and sealing rules.
    ///
    /// # Errors
    ///
    /// - [`CoalesceError::Batch`] with the batch executor's own error
    /// - [`CoalesceError::BatchSizeMismatch`] if the executor broke the length contract
    /// - [`CoalesceError::Abandoned`] if the batch executor panicked
    pub async fn execute_batch<F, Fut>(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        batch_executor: F,
    ) -> Result<V, CoalesceError<E>>
    where
        F: FnOnce(Vec<RequestDescriptor>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    {
        self.inner.execute_batch(descriptor.into(), batch_executor).await
    }

    #[must_use]
    pub fn get_stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(
            self.inner.pending_count.load(Ordering::Acquire),
            self.inner.cache.len(),
            self.inner.batches.lock().len(),
        )
    }

    /// Drops every cached result. In-flight executions and open batches are
    /// unaffected and will still cache their outcomes when they settle.
    pub fn clear(&self) {
        let dropped = self.inner.cache.len();
        self.inner.cache.clear();
        debug!(dropped, "cleared coordinator cache");
    }

    /// Halts the sweeper and seals every open batch group immediately so no
    /// member waits on a delay timer that will never be honored.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(());

        let drained: Vec<(String, BatchGroup<V, E>)> =
            self.inner.batches.lock().drain().collect();
        let flushed = drained.len();
        for (batch_key, group) in drained {
            self.inner.dispatch_batch(batch_key, group, SealReason::Shutdown);
        }

        debug!(flushed_batches = flushed, "coordinator stopped");
    }

    /// Keys with an execution currently in flight.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<RequestKey> {
        self.inner.pending.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn config(&self) -> &DedupConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}
