// tests/api_stream.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot and decode the SSE body
// with the crate's own StreamDecoder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _; // for `oneshot`

use media_search_aggregator::{
    api, AppState, Dispatcher, FetchFailure, FetchOutcome, ResultItem, SearchEvent, SearchQuery,
    SourceDescriptor, SourceFetcher, StaticSourceRegistry, StreamDecoder,
};

const BODY_LIMIT: usize = 1024 * 1024;

/// `ok-*` sources return one item named after the query; anything else fails.
struct Echo;

#[async_trait]
impl SourceFetcher for Echo {
    async fn fetch(
        &self,
        query: &SearchQuery,
        source: &SourceDescriptor,
        _cancel: CancellationToken,
    ) -> FetchOutcome {
        if source.id.starts_with("ok") {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut it = ResultItem::new(source.id.clone(), "1", query.text());
            it.relevance_score = 1000.0;
            FetchOutcome::Success { items: vec![it], latency_ms: 5 }
        } else {
            FetchOutcome::Failure { reason: FetchFailure::Status(500), latency_ms: 1 }
        }
    }
}

fn src(id: &str, enabled: bool) -> SourceDescriptor {
    SourceDescriptor {
        id: id.into(),
        display_name: format!("{id} display"),
        endpoint: format!("https://{id}.test/api"),
        enabled,
    }
}

fn test_router() -> Router {
    let registry = StaticSourceRegistry::new(vec![
        src("ok-a", true),
        src("ok-b", true),
        src("broken", true),
        src("ok-off", false),
    ]);
    api::router(AppState {
        registry: Arc::new(registry),
        dispatcher: Dispatcher::new(Arc::new(Echo)),
    })
}

async fn read_events(resp: shuttle_axum::axum::response::Response) -> Vec<SearchEvent> {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    let mut dec = StreamDecoder::new();
    let mut events = dec.push(&bytes);
    events.extend(dec.finish());
    assert_eq!(dec.skipped(), 0, "every frame should decode");
    events
}

fn post_stream(payload: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/search/stream")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /api/search/stream")
}

#[tokio::test]
async fn health_returns_ok() {
    let resp = test_router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn sources_lists_enabled_only() {
    let resp = test_router()
        .oneshot(Request::get("/api/sources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<&str> = v.as_array().unwrap().iter().map(|s| s["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["ok-a", "ok-b", "broken"]);
    assert_eq!(v[0]["displayName"], "ok-a display");
}

#[tokio::test]
async fn stream_carries_full_event_sequence() {
    let resp = test_router()
        .oneshot(post_stream(json!({"query": " Matrix ", "sourceIds": ["ok-a", "broken"]})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let events = read_events(resp).await;
    let kinds: Vec<&str> = events.iter().map(SearchEvent::kind).collect();
    assert_eq!(kinds.first(), Some(&"start"));
    assert_eq!(kinds.last(), Some(&"complete"));
    assert_eq!(kinds.iter().filter(|k| **k == "progress").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "videos").count(), 1);

    let SearchEvent::Start { total_sources, query, .. } = &events[0] else {
        unreachable!()
    };
    assert_eq!(*total_sources, 2);
    assert_eq!(query.as_deref(), Some("Matrix"));

    let videos = events
        .iter()
        .find_map(|e| match e {
            SearchEvent::Videos { source, source_display_name, videos, .. } => {
                Some((source, source_display_name, videos))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(videos.0, "ok-a");
    assert_eq!(videos.1.as_deref(), Some("ok-a display"));
    assert_eq!(videos.2[0].title, "Matrix");

    let failed = events.iter().any(|e| {
        matches!(e, SearchEvent::Progress { source: Some(s), failed: true, .. } if s == "broken")
    });
    assert!(failed, "failing source must still report progress");

    assert_eq!(
        events.last(),
        Some(&SearchEvent::Complete { total_videos_found: 1, total_sources: 2 })
    );
}

#[tokio::test]
async fn empty_source_list_means_all_enabled() {
    let resp = test_router()
        .oneshot(post_stream(json!({"query": "x"})))
        .await
        .unwrap();
    let events = read_events(resp).await;
    assert!(matches!(events[0], SearchEvent::Start { total_sources: 3, .. }));
    assert!(matches!(
        events.last(),
        Some(SearchEvent::Complete { total_videos_found: 2, total_sources: 3 })
    ));
}

#[tokio::test]
async fn get_form_accepts_query_string() {
    let req = Request::get("/api/search/stream?q=matrix&sources=ok-b,&page=2")
        .body(Body::empty())
        .unwrap();
    let events = read_events(test_router().oneshot(req).await.unwrap()).await;
    assert!(matches!(events[0], SearchEvent::Start { total_sources: 1, .. }));
    assert_eq!(events.last().map(SearchEvent::kind), Some("complete"));
}

#[tokio::test]
async fn blank_query_yields_single_error_event() {
    let resp = test_router()
        .oneshot(post_stream(json!({"query": "   ", "sourceIds": ["ok-a"]})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let events = read_events(resp).await;
    assert_eq!(events.len(), 1);
    let SearchEvent::Error { message } = &events[0] else {
        panic!("expected error event, got {:?}", events[0]);
    };
    assert!(message.contains("query must not be empty"));
}

#[tokio::test]
async fn unknown_or_disabled_sources_are_a_validation_error() {
    let resp = test_router()
        .oneshot(post_stream(json!({"query": "x", "sourceIds": ["nope", "ok-off"]})))
        .await
        .unwrap();
    let events = read_events(resp).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "error");
}

/// Takes five seconds unless cancelled first; counts which way each fetch ended.
#[derive(Default)]
struct Slow {
    cancelled: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for Slow {
    async fn fetch(
        &self,
        query: &SearchQuery,
        source: &SourceDescriptor,
        cancel: CancellationToken,
    ) -> FetchOutcome {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                FetchOutcome::Failure { reason: FetchFailure::Cancelled, latency_ms: 0 }
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                self.finished.fetch_add(1, Ordering::SeqCst);
                let it = ResultItem::new(source.id.clone(), "1", query.text());
                FetchOutcome::Success { items: vec![it], latency_ms: 5_000 }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn closing_the_stream_cancels_upstream_fetches() {
    let fetcher = Arc::new(Slow::default());
    let router = api::router(AppState {
        registry: Arc::new(StaticSourceRegistry::new(vec![src("ok-a", true)])),
        dispatcher: Dispatcher::new(fetcher.clone()),
    });

    let resp = router
        .oneshot(post_stream(json!({"query": "matrix"})))
        .await
        .unwrap();
    let mut frames = resp.into_body().into_data_stream();
    let first = frames.next().await.expect("first frame").expect("frame bytes");
    let events = StreamDecoder::new().push(&first);
    assert_eq!(events.first().map(SearchEvent::kind), Some("start"));

    drop(frames);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(fetcher.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.finished.load(Ordering::SeqCst), 0);
}
