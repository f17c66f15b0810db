//! Periodic expiry sweep for the result cache.
//!
//! Spawned by `Coordinator::start` and runs until the coordinator's shutdown
//! broadcast fires (`Coordinator::stop` or drop of the last handle) or the
//! channel closes.

use crate::{cache::ResultCache, metrics::DedupStats};
use std::sync::Arc;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Duration, MissedTickBehavior},
};
use tracing::debug;

/// Runs the sweep loop.
///
/// # Arguments
/// * `cache` - Shared result cache to sweep
/// * `stats` - Counters receiving the `expired` increments
/// * `interval` - Time between sweeps
/// * `shutdown_rx` - Broadcast receiver for the stop signal
pub async fn run_sweeper<V: Clone>(
    cache: ResultCache<V>,
    stats: Arc<DedupStats>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(interval_ms = interval.as_millis(), "starting result cache sweeper");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so the first sweep runs
    // one full interval after start.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            signal = shutdown_rx.recv() => {
                match signal {
                    Ok(()) | Err(RecvError::Closed) => {
                        debug!("result cache sweeper shutting down");
                        break;
                    }
                    Err(RecvError::Lagged(_)) => {}
                }
            }

            _ = ticker.tick() => {
                let evicted = sweep_once(&cache, &stats);
                if evicted > 0 {
                    debug!(evicted, remaining = cache.len(), "swept expired results");
                }
            }
        }
    }
}

/// Performs a single sweep and records the evictions.
pub fn sweep_once<V: Clone>(cache: &ResultCache<V>, stats: &DedupStats) -> usize {
    let evicted = cache.sweep();
    stats.record_expired(evicted as u64);
    evicted
}
