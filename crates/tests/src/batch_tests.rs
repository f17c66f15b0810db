//! Integration tests for batch aggregation.
//!
//! Covers immediate sealing at `batch_size`, delayed sealing of partial
//! batches, grouping by path, and reuse of batch results by direct calls.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::support::{
    counted_executor, create_coordinator, echo_batch_executor, http_descriptor, BatchLog,
};
use coalesce_core::DedupConfig;
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

fn batch_config(batch_size: usize, batch_delay_ms: u64) -> DedupConfig {
    DedupConfig { batch_size, batch_delay_ms, ..DedupConfig::default() }
}

#[tokio::test]
async fn test_full_batch_runs_before_delay() {
    let coordinator = create_coordinator(batch_config(3, 1_000));
    let batch_log = BatchLog::default();
    let started = Instant::now();

    let results = futures::future::join_all((1..=3).map(|id| {
        coordinator
            .execute_batch(
                http_descriptor("GET", "/api/users", id),
                echo_batch_executor(&batch_log),
            )
    }))
    .await;

    assert!(started.elapsed() < Duration::from_millis(500), "full batch must not wait");
    assert_eq!(*batch_log.lock(), vec![3]);
    for (id, result) in (1..=3).zip(results) {
        assert_eq!(result.unwrap(), json!({ "id": id }));
    }
}

#[tokio::test]
async fn test_partial_batch_runs_after_delay() {
    let coordinator = create_coordinator(batch_config(3, 100));
    let batch_log = BatchLog::default();
    let started = Instant::now();

    let (a, b) = tokio::join!(
        coordinator.execute_batch(
            http_descriptor("GET", "/api/users", 1),
            echo_batch_executor(&batch_log),
        ),
        coordinator.execute_batch(
            http_descriptor("GET", "/api/users", 2),
            echo_batch_executor(&batch_log),
        ),
    );

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(a.unwrap(), json!({ "id": 1 }));
    assert_eq!(b.unwrap(), json!({ "id": 2 }));
    assert_eq!(*batch_log.lock(), vec![2]);
}

#[tokio::test]
async fn test_batches_grouped_by_path() {
    let coordinator = create_coordinator(batch_config(10, 50));
    let batch_log = BatchLog::default();

    let (users_a, users_b, posts) = tokio::join!(
        coordinator.execute_batch(
            http_descriptor("GET", "/api/users", 1),
            echo_batch_executor(&batch_log),
        ),
        coordinator.execute_batch(
            http_descriptor("GET", "/api/users", 2),
            echo_batch_executor(&batch_log),
        ),
        coordinator.execute_batch(
            http_descriptor("GET", "/api/posts", 3),
            echo_batch_executor(&batch_log),
        ),
    );

    users_a.unwrap();
    users_b.unwrap();
    posts.unwrap();

    let mut sizes = batch_log.lock().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);
}

#[tokio::test]
async fn test_endpoint_field_and_default_bucket() {
    let coordinator = create_coordinator(batch_config(10, 50));
    let batch_log = BatchLog::default();

    let (a, b, c, d) = tokio::join!(
        coordinator.execute_batch(
            json!({ "endpoint": "search", "id": 1 }),
            echo_batch_executor(&batch_log),
        ),
        coordinator.execute_batch(
            json!({ "endpoint": "search", "id": 2 }),
            echo_batch_executor(&batch_log),
        ),
        coordinator.execute_batch(json!({ "id": 3 }), echo_batch_executor(&batch_log)),
        coordinator.execute_batch("plain-key", echo_batch_executor(&batch_log)),
    );

    assert_eq!(a.unwrap(), json!({ "id": 1 }));
    assert_eq!(b.unwrap(), json!({ "id": 2 }));
    assert_eq!(c.unwrap(), json!({ "id": 3 }));
    assert_eq!(d.unwrap(), json!({ "id": null }));

    let mut sizes = batch_log.lock().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 2], "`id`-only and plain keys share the default bucket");
}

#[tokio::test]
async fn test_direct_execute_reuses_batch_result() {
    let coordinator = create_coordinator(batch_config(1, 50));
    let batch_log = BatchLog::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let descriptor = http_descriptor("GET", "/api/users", 42);

    let batched = coordinator
        .execute_batch(descriptor.clone(), echo_batch_executor(&batch_log))
        .await
        .unwrap();
    let direct = coordinator
        .execute(descriptor, counted_executor(&calls, "direct", Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(batched, direct);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let stats = coordinator.get_stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.deduplicated, 1);
}
