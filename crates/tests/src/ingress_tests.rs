//! Integration tests for the HTTP ingress adapter through the assembled app.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use coalesce_core::{config::AppConfig, Coordinator, DedupConfig};
use server::{
    middleware::{create_deduplication_middleware, DedupCoordinator, DedupState, X_DEDUP},
    router::create_app,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tower::ServiceExt;

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn counting_origin(coordinator: DedupCoordinator, calls: &Arc<AtomicUsize>) -> Router {
    let report = {
        let calls = Arc::clone(calls);
        move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
            format!("report #{n}")
        }
    };
    let broken = {
        let calls = Arc::clone(calls);
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            (StatusCode::INTERNAL_SERVER_ERROR, "boom")
        }
    };

    create_deduplication_middleware(
        Router::new().route("/report", get(report)).route("/broken", get(broken)),
        DedupState::new(coordinator, 1 << 20),
    )
}

#[tokio::test]
async fn test_concurrent_gets_share_one_handler_run() {
    let coordinator: DedupCoordinator = Coordinator::new(DedupConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_origin(coordinator.clone(), &calls);

    let responses =
        futures::future::join_all((0..8).map(|_| app.clone().oneshot(get_request("/report"))))
            .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut tags = Vec::new();
    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        tags.push(response.headers()[&X_DEDUP].to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"report #1");
    }

    assert_eq!(tags.iter().filter(|t| *t == "MISS").count(), 1);
    assert_eq!(tags.iter().filter(|t| *t == "HIT").count(), 7);
    assert_eq!(coordinator.get_stats().deduplicated, 7);
}

#[tokio::test]
async fn test_server_error_shared_but_not_cached() {
    let coordinator: DedupCoordinator = Coordinator::new(DedupConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_origin(coordinator.clone(), &calls);

    let (a, b) = tokio::join!(
        app.clone().oneshot(get_request("/broken")),
        app.clone().oneshot(get_request("/broken")),
    );
    assert_eq!(a.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(b.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let retry = app.clone().oneshot(get_request("/broken")).await.unwrap();
    assert_eq!(retry.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.get_stats().cached, 0);
}

#[tokio::test]
async fn test_assembled_app_admin_surface() {
    let config = AppConfig::default();
    let coordinator: DedupCoordinator = Coordinator::new(config.dedup.clone()).unwrap();
    let app = create_app(coordinator.clone(), &config, None);

    let first = app.clone().oneshot(get_request("/api/orders/1")).await.unwrap();
    assert_eq!(first.headers()[&X_DEDUP], "MISS");
    let second = app.clone().oneshot(get_request("/api/orders/1")).await.unwrap();
    assert_eq!(second.headers()[&X_DEDUP], "HIT");

    let stats = app.clone().oneshot(get_request("/admin/dedup/stats")).await.unwrap();
    assert_eq!(stats.status(), StatusCode::OK);
    let body = to_bytes(stats.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["cached"], 1);

    let clear = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/admin/dedup/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(clear.status(), StatusCode::NO_CONTENT);

    let third = app.clone().oneshot(get_request("/api/orders/1")).await.unwrap();
    assert_eq!(third.headers()[&X_DEDUP], "MISS");
}
