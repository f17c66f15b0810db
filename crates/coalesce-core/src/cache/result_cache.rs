//! TTL-bounded store of successful outcomes.

use crate::types::RequestKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// A successful outcome and the instant it stops being servable.
#[derive(Debug, Clone)]
pub struct CachedResult<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CachedResult<V> {
    /// Valid while `now < expires_at`.
    #[inline]
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Concurrent key → outcome map with per-entry expiry.
///
/// Expiry is enforced lazily on [`get`](Self::get) and actively by
/// [`sweep`](Self::sweep), which the background sweeper calls on a fixed
/// interval so write-once keys do not accumulate.
///
/// # Cloning
///
/// Clones share the same underlying map.
#[derive(Debug)]
pub struct ResultCache<V> {
    entries: Arc<DashMap<RequestKey, CachedResult<V>>>,
}

impl<V> Clone for ResultCache<V> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }
}

impl<V> ResultCache<V> {
    /// Entry count, including expired entries not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&self, key: RequestKey, value: V, expires_at: Instant) {
        self.entries.insert(key, CachedResult { value, expires_at });
    }
}

impl<V: Clone> ResultCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key` if present and unexpired.
    ///
    /// An expired entry found here is removed, but is not counted as an
    /// eviction; only sweeps report evictions.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_valid_at(now) {
                return Some(entry.value.clone());
            }
            // shard read lock released here, before the removal below
        }
        self.entries.remove_if(key, |_, cached| !cached.is_valid_at(now));
        None
    }

    /// Stores `value` valid for `ttl` from now.
    pub fn insert(&self, key: RequestKey, value: V, ttl: Duration) {
        self.set(key, value, Instant::now() + ttl);
    }

    /// Drops every entry unconditionally.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evicts every entry with `now >= expires_at` and returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        let mut evicted = 0usize;
        self.entries.retain(|_, cached| {
            let keep = cached.is_valid_at(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        tracing::trace!(before, evicted, "result cache sweep");
        evicted
    }
}
