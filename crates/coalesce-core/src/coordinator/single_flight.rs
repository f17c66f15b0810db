//! Single-flight execution: one physical execution per key, N-1 free riders.
//!
//! # Admission Protocol
//!
//! ```text
//! execute(descriptor, executor)
//!        │  total += 1
//!        ▼
//! ┌──────────────────────────────┐
//! │ pending.entry(key)           │ ◄── DashMap shard lock held for the
//! └──────────────┬───────────────┘     whole decision below
//!                │
//!     ┌──────────┴──────────┐
//!  Occupied               Vacant
//!     │                     │
//!     ▼                     ▼
//!  Join shared       fresh cached result? ── yes ──► return it (deduplicated += 1)
//!  handle                   │ no
//!  (deduplicated += 1)      ▼
//!                    reserve pending slot ── full ──► CapacityExceeded
//!                           │ ok
//!                           ▼
//!                    insert PendingEntry, release shard lock,
//!                    spawn executor task, await shared handle
//! ```
//!
//! # Settlement Order
//!
//! The executor task writes the cache (on success), removes the pending entry
//! and only then completes the oneshot behind the shared handle. A caller
//! arriving at any point therefore sees either the pending entry or the cached
//! value, and no caller can attach to an entry that has already settled.

use super::{CoalesceError, Inner};
use crate::types::{RequestDescriptor, RequestKey};
use dashmap::mapref::entry::Entry;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt as _,
};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{atomic::Ordering, Arc},
};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, trace};

/// Outcome handle every caller of an in-flight key awaits.
pub(crate) type SharedOutcome<V, E> = Shared<BoxFuture<'static, Result<V, CoalesceError<E>>>>;

type OutcomeSender<V, E> = oneshot::Sender<Result<V, CoalesceError<E>>>;

/// Bookkeeping for one in-flight execution.
pub(crate) struct PendingEntry<V, E> {
    pub(crate) shared: SharedOutcome<V, E>,
    pub(crate) started_at: Instant,
}

enum Admission<V, E> {
    Cached(V),
    Joined(SharedOutcome<V, E>),
    Leader { shared: SharedOutcome<V, E>, tx: OutcomeSender<V, E> },
    Rejected,
}

impl<V, E> Inner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) async fn execute<F, Fut>(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        executor: F,
    ) -> Result<V, CoalesceError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = descriptor.request_key(self.config.enable_hashing);
        self.stats.record_request();

        match self.admit(&key) {
            Admission::Cached(value) => {
                self.stats.record_deduplicated();
                trace!(key = %key, "served from cache");
                Ok(value)
            }
            Admission::Joined(shared) => {
                self.stats.record_deduplicated();
                trace!(key = %key, "joined in-flight execution");
                shared.await
            }
            Admission::Rejected => {
                debug!(
                    key = %key,
                    max_pending = self.config.max_pending,
                    "rejected new key at pending capacity"
                );
                Err(CoalesceError::CapacityExceeded { max_pending: self.config.max_pending })
            }
            Admission::Leader { shared, tx } => {
                self.spawn_execution(key, executor, tx);
                shared.await
            }
        }
    }

    /// Decides how a call for `key` is served. Runs entirely under the pending
    /// table's shard lock for `key`.
    fn admit(&self, key: &RequestKey) -> Admission<V, E> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => Admission::Joined(entry.get().shared.clone()),
            Entry::Vacant(entry) => {
                if let Some(value) = self.cache.get(key.as_str()) {
                    return Admission::Cached(value);
                }

                if !self.try_reserve_pending_slot() {
                    return Admission::Rejected;
                }

                let (tx, rx) = oneshot::channel();
                let abandoned_key = key.clone();
                let shared = async move {
                    rx.await
                        .unwrap_or_else(|_| Err(CoalesceError::Abandoned { key: abandoned_key }))
                }
                .boxed()
                .shared();

                entry.insert(PendingEntry { shared: shared.clone(), started_at: Instant::now() });
                Admission::Leader { shared, tx }
            }
        }
    }

    fn try_reserve_pending_slot(&self) -> bool {
        let max_pending = self.config.max_pending;
        self.pending_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max_pending).then_some(current + 1)
            })
            .is_ok()
    }

    /// Drives the executor in its own task so the execution finishes, and the
    /// pending entry is released, even if every caller stops waiting.
    fn spawn_execution<F, Fut>(
        self: &Arc<Self>,
        key: RequestKey,
        executor: F,
        tx: OutcomeSender<V, E>,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { executor().await }).catch_unwind().await;
            let settled = inner.settle(&key, outcome);
            // Every receiver may be gone; the outcome is already cached.
            let _ = tx.send(settled);
        });
    }

    fn settle(
        &self,
        key: &RequestKey,
        outcome: Result<Result<V, E>, Box<dyn Any + Send>>,
    ) -> Result<V, CoalesceError<E>> {
        let settled = match outcome {
            Ok(Ok(value)) => {
                self.cache.insert(key.clone(), value.clone(), self.config.ttl());
                self.stats.record_completed(1);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.stats.record_failed(1);
                Err(CoalesceError::Execution(error))
            }
            Err(_panic) => {
                self.stats.record_failed(1);
                Err(CoalesceError::Abandoned { key: key.clone() })
            }
        };

        if let Some((_, entry)) = self.pending.remove(key) {
            self.pending_count.fetch_sub(1, Ordering::AcqRel);
            trace!(
                key = %key,
                elapsed_ms = entry.started_at.elapsed().as_millis(),
                success = settled.is_ok(),
                "execution settled"
            );
        }

        settled
    }
}
