//! Integration tests for single-flight execution through the public API.
//!
//! Covers sharing of one execution among concurrent callers, independence of
//! distinct keys, TTL expiry, absence of negative caching, pending-capacity
//! backpressure and the derived deduplication rate.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::support::{
    counted_executor, create_coordinator, failing_executor, poll_until, remains_false_for,
    TestTiming,
};
use coalesce_core::{CoalesceError, DedupConfig};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[tokio::test]
async fn test_five_concurrent_callers_share_one_execution() {
    let coordinator = create_coordinator(DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let results = futures::future::join_all((0..5).map(|_| {
        coordinator.execute(
            "request1",
            counted_executor(&calls, "first", Duration::from_millis(100)),
        )
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!({ "data": "first" }));
    }
}

#[tokio::test]
async fn test_distinct_keys_each_execute_once() {
    let coordinator = create_coordinator(DedupConfig::default());
    let calls_one = Arc::new(AtomicUsize::new(0));
    let calls_two = Arc::new(AtomicUsize::new(0));

    let (one, two) = tokio::join!(
        coordinator.execute(
            "request1",
            counted_executor(&calls_one, "one", Duration::from_millis(50)),
        ),
        coordinator.execute(
            "request2",
            counted_executor(&calls_two, "two", Duration::from_millis(50)),
        ),
    );

    assert_eq!(one.unwrap(), json!({ "data": "one" }));
    assert_eq!(two.unwrap(), json!({ "data": "two" }));
    assert_eq!(calls_one.load(Ordering::SeqCst), 1);
    assert_eq!(calls_two.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_result_expires_after_ttl() {
    let coordinator = create_coordinator(DedupConfig { ttl_ms: 100, ..DedupConfig::default() });
    let calls = Arc::new(AtomicUsize::new(0));

    coordinator.execute("request1", counted_executor(&calls, "v", Duration::ZERO)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.execute("request1", counted_executor(&calls, "v", Duration::ZERO)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let coordinator = create_coordinator(DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let err = coordinator
            .execute("request1", failing_executor(&calls, "Test error"))
            .await
            .unwrap_err();
        assert_eq!(err, CoalesceError::Execution("Test error".to_string()));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.get_stats().failed, 2);
}

#[tokio::test]
async fn test_third_distinct_key_rejected_at_capacity() {
    let coordinator = create_coordinator(DedupConfig { max_pending: 2, ..DedupConfig::default() });
    let calls = Arc::new(AtomicUsize::new(0));
    let timing = TestTiming::default();

    let slow: Vec<_> = ["request1", "request2"]
        .into_iter()
        .map(|key| {
            let coordinator = coordinator.clone();
            let executor = counted_executor(&calls, key, Duration::from_millis(300));
            tokio::spawn(async move { coordinator.execute(key, executor).await })
        })
        .collect();

    poll_until("both keys pending", &timing, || {
        let coordinator = coordinator.clone();
        async move { coordinator.get_stats().pending == 2 }
    })
    .await
    .unwrap();

    let rejected = coordinator
        .execute("request3", counted_executor(&calls, "request3", Duration::ZERO))
        .await
        .unwrap_err();
    assert!(rejected.is_capacity_exceeded());

    for handle in slow {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_deduplication_rate_two_thirds() {
    let coordinator = create_coordinator(DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        coordinator
            .execute("request1", counted_executor(&calls, "v", Duration::ZERO))
            .await
            .unwrap();
    }

    let stats = coordinator.get_stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.deduplicated, 2);
    assert!((stats.deduplication_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_hashed_and_unhashed_structured_keys() {
    let hashed = create_coordinator(DedupConfig::default());
    let raw = create_coordinator(DedupConfig { enable_hashing: false, ..DedupConfig::default() });
    let calls = Arc::new(AtomicUsize::new(0));
    let timing = TestTiming::default();

    for coordinator in [&hashed, &raw] {
        let handle = {
            let coordinator = coordinator.clone();
            let executor = counted_executor(&calls, "k", Duration::from_millis(200));
            tokio::spawn(async move {
                coordinator.execute(json!({ "z": [1, 2], "a": { "y": 1, "b": 2 } }), executor).await
            })
        };
        poll_until("key pending", &timing, || {
            let coordinator = coordinator.clone();
            async move { !coordinator.pending_keys().is_empty() }
        })
        .await
        .unwrap();

        let key = coordinator.pending_keys()[0].clone();
        if coordinator.config().enable_hashing {
            assert_eq!(key.as_str().len(), 64);
            assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        } else {
            assert_eq!(key.as_str(), r#"{"a":{"b":2,"y":1},"z":[1,2]}"#);
        }

        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_stopped_sweeper_does_not_evict() {
    let coordinator = create_coordinator(DedupConfig {
        ttl_ms: 20,
        sweep_interval_ms: 30,
        ..DedupConfig::default()
    });
    coordinator.start();
    coordinator.stop();

    let calls = Arc::new(AtomicUsize::new(0));
    coordinator.execute("request1", counted_executor(&calls, "v", Duration::ZERO)).await.unwrap();

    remains_false_for("sweep after stop", &TestTiming::default(), || {
        let coordinator = coordinator.clone();
        async move { coordinator.get_stats().expired > 0 }
    })
    .await
    .unwrap();
}
