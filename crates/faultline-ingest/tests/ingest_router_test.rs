//! Router-level tests mirroring the teacher's `auth_middleware_test.rs`
//! oneshot-request convention: build the real router over an in-memory
//! store, drive it end to end, assert on status/body/enqueued messages.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use faultline_core::store::EventStore;
use faultline_harness::throttle::ThrottleGate;
use faultline_ingest::dedup::EventDedup;
use faultline_ingest::state::AppState;
use faultline_ingest::ingest_router;
use tower::ServiceExt;
use uuid::Uuid;

const ORG_ID: i64 = 1;
const PROJECT_ID: i64 = 7;

async fn test_state() -> (AppState, Uuid, flume::Receiver<faultline_types::IngestTaskMessage>) {
    let store = EventStore::new_in_memory().await.unwrap();
    let dsn = Uuid::new_v4();
    store
        .provision_project(ORG_ID, "acme", PROJECT_ID, "widgets", dsn)
        .await
        .unwrap();

    let throttle = Arc::new(ThrottleGate::new(Duration::from_secs(30), 100));
    let dedup = Arc::new(EventDedup::new(Duration::from_secs(60)));
    let (tx, rx) = flume::bounded(16);
    let state = AppState::new(Arc::new(store), throttle, dedup, tx, 1_000_000);
    (state, dsn, rx)
}

fn event_body() -> Body {
    Body::from(r#"{"message": "boom"}"#)
}

#[tokio::test]
async fn unauthenticated_request_is_denied() {
    let (state, _dsn, _rx) = test_state().await;
    let app = ingest_router(state);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/{PROJECT_ID}/store/"))
        .header("content-type", "application/json")
        .body(event_body())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn valid_dsn_is_accepted_and_enqueued() {
    let (state, dsn, rx) = test_state().await;
    let app = ingest_router(state);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/{PROJECT_ID}/store/?sentry_key={dsn}"))
        .header("content-type", "application/json")
        .body(event_body())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let msg = rx.try_recv().expect("event should have been enqueued");
    assert_eq!(msg.project_id, PROJECT_ID);
    assert_eq!(msg.organization_id, ORG_ID);
}

#[tokio::test]
async fn dsn_for_a_different_project_is_denied() {
    let (state, dsn, _rx) = test_state().await;
    let app = ingest_router(state);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/999/store/?sentry_key={dsn}"))
        .header("content-type", "application/json")
        .body(event_body())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn maintenance_freeze_returns_503() {
    let (state, dsn, _rx) = test_state().await;
    state.maintenance_freeze.store(true, Ordering::Relaxed);
    let app = ingest_router(state);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/{PROJECT_ID}/store/?sentry_key={dsn}"))
        .header("content-type", "application/json")
        .body(event_body())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn oversized_gzip_payload_is_rejected_413() {
    let (mut state, dsn, _rx) = test_state().await;
    state.max_request_bytes = 16;
    let app = ingest_router(state);

    // Decompresses to far more than the 16-byte cap.
    let big_json = format!(r#"{{"message": "{}"}}"#, "x".repeat(4096));
    let compressed = gzip(big_json.as_bytes()).await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/{PROJECT_ID}/store/?sentry_key={dsn}"))
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .body(Body::from(compressed))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

async fn gzip(data: &[u8]) -> Vec<u8> {
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}
