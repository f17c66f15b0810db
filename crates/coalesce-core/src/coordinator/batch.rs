//! Batch aggregation: many distinct keys, one aggregated execution.
//!
//! Members are grouped by batch key (see [`RequestDescriptor::batch_key`]).
//! A group is sealed by whichever comes first:
//!
//! ```text
//! member 1 ──┐
//! member 2 ──┼──► open BatchGroup ──► sealed ──► batch_executor([d1, d2, d3])
//! member 3 ──┘     │                              │
//!                  ├─ len == batch_size ─► Size   ├─ Ok(results) ─► cache + resolve each
//!                  └─ batch_delay elapsed ─► Delay└─ Err(e)      ─► reject each with e
//! ```
//!
//! A member whose own key already has a fresh cached result is answered
//! directly and never joins a group. Results written here land in the same
//! cache `execute` reads, so later direct calls reuse them.
//!
//! # Generations
//!
//! Each opened group gets a fresh generation number. The delay timer only
//! seals the group it was started for; if that group was already sealed by
//! size and a new group reopened under the same batch key, the stale timer
//! finds a different generation and does nothing.

use super::{CoalesceError, Inner};
use crate::types::{RequestDescriptor, RequestKey};
use futures::{future::BoxFuture, FutureExt as _};
use std::{
    collections::hash_map::Entry,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{atomic::Ordering, Arc},
};
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{debug, trace};

type BoxedBatchExecutor<V, E> =
    Box<dyn FnOnce(Vec<RequestDescriptor>) -> BoxFuture<'static, Result<Vec<V>, E>> + Send>;

/// One caller waiting on a batch.
pub(crate) struct BatchMember<V, E> {
    descriptor: RequestDescriptor,
    key: RequestKey,
    tx: oneshot::Sender<Result<V, CoalesceError<E>>>,
}

/// An open group of members sharing a batch key.
pub(crate) struct BatchGroup<V, E> {
    generation: u64,
    opened_at: Instant,
    members: Vec<BatchMember<V, E>>,
    /// Supplied by the member that opened the group.
    executor: BoxedBatchExecutor<V, E>,
    timer: Option<JoinHandle<()>>,
}

impl<V, E> BatchGroup<V, E> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SealReason {
    Size,
    Delay,
    Shutdown,
}

impl SealReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Delay => "delay",
            Self::Shutdown => "shutdown",
        }
    }
}

impl<V, E> Inner<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) async fn execute_batch<F, Fut>(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        batch_executor: F,
    ) -> Result<V, CoalesceError<E>>
    where
        F: FnOnce(Vec<RequestDescriptor>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
    {
        self.stats.record_request();

        let key = descriptor.request_key(self.config.enable_hashing);
        if let Some(value) = self.cache.get(key.as_str()) {
            self.stats.record_deduplicated();
            trace!(key = %key, "batch member served from cache");
            return Ok(value);
        }

        let batch_key = descriptor.batch_key();
        let (tx, rx) = oneshot::channel();
        let member = BatchMember { descriptor, key: key.clone(), tx };
        let executor: BoxedBatchExecutor<V, E> =
            Box::new(move |descriptors| batch_executor(descriptors).boxed());

        if let Some(sealed) = self.enqueue(&batch_key, member, executor) {
            self.dispatch_batch(batch_key, sealed, SealReason::Size);
        }

        rx.await.unwrap_or_else(|_| Err(CoalesceError::Abandoned { key }))
    }

    /// Attaches `member` to the open group for `batch_key`, opening one if
    /// needed. Returns the group if this member filled it.
    fn enqueue(
        self: &Arc<Self>,
        batch_key: &str,
        member: BatchMember<V, E>,
        executor: BoxedBatchExecutor<V, E>,
    ) -> Option<BatchGroup<V, E>> {
        let batch_size = self.config.batch_size;
        let mut groups = self.batches.lock();

        let (full, needs_timer, generation) = {
            let group = match groups.entry(batch_key.to_string()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    debug!(batch_key = %batch_key, generation, "opened batch group");
                    vacant.insert(BatchGroup {
                        generation,
                        opened_at: Instant::now(),
                        members: Vec::with_capacity(batch_size),
                        executor,
                        timer: None,
                    })
                }
            };
            group.members.push(member);
            (group.members.len() >= batch_size, group.timer.is_none(), group.generation)
        };

        if full {
            let mut sealed = groups.remove(batch_key)?;
            sealed.cancel_timer();
            return Some(sealed);
        }

        if needs_timer {
            let timer = self.spawn_delay_timer(batch_key.to_string(), generation);
            if let Some(group) = groups.get_mut(batch_key) {
                group.timer = Some(timer);
            }
        }

        None
    }

    fn spawn_delay_timer(self: &Arc<Self>, batch_key: String, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let delay = self.config.batch_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let expired = {
                let mut groups = inner.batches.lock();
                let current =
                    groups.get(&batch_key).is_some_and(|group| group.generation == generation);
                if current {
                    groups.remove(&batch_key)
                } else {
                    None
                }
            };

            if let Some(group) = expired {
                inner.run_batch(batch_key, group, SealReason::Delay).await;
            }
        })
    }

    /// Runs a sealed group on its own task, or rejects its members if no
    /// runtime is available.
    pub(crate) fn dispatch_batch(
        self: &Arc<Self>,
        batch_key: String,
        mut group: BatchGroup<V, E>,
        reason: SealReason,
    ) {
        group.cancel_timer();

        if tokio::runtime::Handle::try_current().is_err() {
            debug!(batch_key = %batch_key, "no runtime to run sealed batch, abandoning members");
            self.reject_all(group.members, |member| CoalesceError::Abandoned {
                key: member.key.clone(),
            });
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_batch(batch_key, group, reason).await;
        });
    }

    async fn run_batch(&self, batch_key: String, group: BatchGroup<V, E>, reason: SealReason) {
        let BatchGroup { generation, opened_at, members, executor, .. } = group;
        let expected = members.len();
        let descriptors: Vec<RequestDescriptor> =
            members.iter().map(|member| member.descriptor.clone()).collect();

        debug!(
            batch_key = %batch_key,
            generation,
            members = expected,
            reason = reason.as_str(),
            waited_ms = opened_at.elapsed().as_millis(),
            "sealed batch group"
        );

        let outcome = AssertUnwindSafe(async move { executor(descriptors).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(results)) if results.len() == expected => {
                let ttl = self.config.ttl();
                for (member, value) in members.into_iter().zip(results) {
                    self.cache.insert(member.key, value.clone(), ttl);
                    // The member may have stopped waiting; its result stays cached.
                    let _ = member.tx.send(Ok(value));
                }
                self.stats.record_completed(expected as u64);
                trace!(batch_key = %batch_key, members = expected, "batch completed");
            }
            Ok(Ok(results)) => {
                let actual = results.len();
                self.reject_all(members, |_| CoalesceError::BatchSizeMismatch { expected, actual });
            }
            Ok(Err(error)) => {
                self.reject_all(members, |_| CoalesceError::Batch(error.clone()));
            }
            Err(_panic) => {
                self.reject_all(members, |member| CoalesceError::Abandoned {
                    key: member.key.clone(),
                });
            }
        }
    }

    fn reject_all(
        &self,
        members: Vec<BatchMember<V, E>>,
        error_for: impl Fn(&BatchMember<V, E>) -> CoalesceError<E>,
    ) {
        self.stats.record_failed(members.len() as u64);
        for member in members {
            let error = error_for(&member);
            let _ = member.tx.send(Err(error));
        }
    }
}
