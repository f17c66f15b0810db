//! Request deduplication middleware.
//!
//! Concurrent requests with the same method and path share one run of the
//! downstream handler. The first request (the winner) drives the handler and
//! buffers its response; every request that joins while it is in flight, or
//! arrives while its result is still cached, receives an identical copy.
//!
//! ```text
//! GET /users?page=2 ──► key "GET:/users" ──► Coordinator::execute
//!                                              │
//!                          ┌───────────────────┴───────────────────┐
//!                       winner                                  joiners
//!                          │                                       │
//!              next.run(request), buffer body            await shared outcome
//!                          │                                       │
//!                          └──────► CapturedResponse ◄─────────────┘
//!                                        │
//!                        x-dedup: MISS (winner) / HIT (others)
//! ```
//!
//! A 5xx response, or a body that cannot be buffered within the configured
//! limit, is a failed execution: it is still replayed to everyone who joined
//! but is never cached.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use coalesce_core::{CoalesceError, Coordinator};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

/// Response header telling the client whether it triggered the handler.
pub static X_DEDUP: HeaderName = HeaderName::from_static("x-dedup");

const DEDUP_MISS: &str = "MISS";
const DEDUP_HIT: &str = "HIT";

/// Coordinator specialised for buffered HTTP responses. Failed executions
/// carry the failing response itself so it can be replayed verbatim.
pub type DedupCoordinator = Coordinator<CapturedResponse, CapturedResponse>;

/// A fully buffered downstream response.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Buffers `response` up to `max_body_bytes`.
    ///
    /// # Errors
    ///
    /// Returns the captured response itself for a 5xx status, or a 500
    /// response if the body exceeds the limit or fails mid-stream.
    pub async fn capture(response: Response, max_body_bytes: usize) -> Result<Self, Self> {
        let (parts, body) = response.into_parts();

        let body = match to_bytes(body, max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, max_body_bytes, "failed to buffer downstream response");
                return Err(Self::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "response body could not be buffered",
                ));
            }
        };

        let captured = Self { status: parts.status, headers: parts.headers, body };
        if captured.status.is_server_error() {
            Err(captured)
        } else {
            Ok(captured)
        }
    }

    /// Builds a JSON `{"error": message}` response.
    #[must_use]
    pub fn error(status: StatusCode, message: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = serde_json::json!({ "error": message }).to_string();

        Self { status, headers, body: Bytes::from(body) }
    }

    /// Rebuilds an HTTP response tagged with `x-dedup`.
    fn into_response_tagged(self, tag: &'static str) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().insert(X_DEDUP.clone(), HeaderValue::from_static(tag));
        response
    }
}

impl fmt::Display for CapturedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.status, self.body.len())
    }
}

/// State carried by the deduplication layer.
#[derive(Clone)]
pub struct DedupState {
    pub coordinator: DedupCoordinator,
    pub max_body_bytes: usize,
}

impl DedupState {
    #[must_use]
    pub fn new(coordinator: DedupCoordinator, max_body_bytes: usize) -> Self {
        Self { coordinator, max_body_bytes }
    }
}

/// Wraps every route of `router` in the deduplication middleware.
pub fn create_deduplication_middleware<S>(router: Router<S>, state: DedupState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum_middleware::from_fn_with_state(state, dedup_middleware))
}

/// Key shared by requests that should be served by one handler run.
/// The query string is not part of it.
#[must_use]
pub fn dedup_key(request: &Request) -> String {
    format!("{}:{}", request.method(), request.uri().path())
}

/// Axum middleware that funnels requests through the coordinator.
pub async fn dedup_middleware(
    State(state): State<DedupState>,
    request: Request,
    next: Next,
) -> Response {
    let key = dedup_key(&request);
    let executed = Arc::new(AtomicBool::new(false));

    let executor = {
        let executed = Arc::clone(&executed);
        let max_body_bytes = state.max_body_bytes;
        move || async move {
            executed.store(true, Ordering::Release);
            let response = next.run(request).await;
            CapturedResponse::capture(response, max_body_bytes).await
        }
    };

    let outcome = state.coordinator.execute(key.as_str(), executor).await;
    let tag = if executed.load(Ordering::Acquire) { DEDUP_MISS } else { DEDUP_HIT };

    match outcome {
        Ok(captured) | Err(CoalesceError::Execution(captured)) => {
            captured.into_response_tagged(tag)
        }
        Err(CoalesceError::CapacityExceeded { max_pending }) => {
            warn!(key = %key, max_pending, "rejecting request, too many pending executions");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "too many pending requests",
                    "maxPending": max_pending,
                })),
            )
                .into_response()
        }
        Err(err) => {
            warn!(key = %key, error = err.as_str(), "deduplicated handler did not complete");
            CapturedResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "request handler failed")
                .into_response_tagged(tag)
        }
    }
}
