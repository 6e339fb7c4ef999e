// tests/fetch_http.rs
//
// HttpFetcher against a mocked upstream (wiremock). Covers the request shape, the
// success path, and each failure classification.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use media_search_aggregator::{
    FetchFailure, FetchOutcome, HttpFetcher, RelevanceScorer, SearchQuery, SourceDescriptor,
    SourceFetcher,
};

fn source_for(server: &MockServer) -> SourceDescriptor {
    SourceDescriptor {
        id: "mock".into(),
        display_name: "Mock TV".into(),
        endpoint: format!("{}/api.php/provide/vod", server.uri()),
        enabled: true,
    }
}

fn fetcher(timeout_ms: u64) -> HttpFetcher {
    HttpFetcher::new(Duration::from_millis(timeout_ms))
        .expect("build fetcher")
        .with_scorer(RelevanceScorer::new(2024))
}

fn query(text: &str) -> SearchQuery {
    SearchQuery::new(text, 2, Vec::<String>::new()).unwrap()
}

fn failure_reason(outcome: FetchOutcome) -> FetchFailure {
    match outcome {
        FetchOutcome::Failure { reason, .. } => reason,
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn success_normalizes_scores_and_stamps_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api.php/provide/vod"))
        .and(query_param("ac", "videolist"))
        .and(query_param("wd", "Matrix"))
        .and(query_param("pg", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "list": [
                {"vod_id": 11, "vod_name": "Matrix", "vod_year": "1999",
                 "vod_remarks": "HD", "vod_play_url": "正片$https://cdn.test/m.m3u8"},
                {"vod_id": "12", "vod_name": "The Animatrix", "vod_actor": "Keanu"},
                {"vod_name": "no id, dropped"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let src = source_for(&server);
    let outcome = fetcher(2_000).fetch(&query("Matrix"), &src, CancellationToken::new()).await;

    let FetchOutcome::Success { items, latency_ms } = outcome else {
        panic!("expected success");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].external_id, "11");
    assert_eq!(items[0].source_id, "mock");
    assert_eq!(items[0].source_display_name.as_deref(), Some("Mock TV"));
    assert_eq!(items[0].year, Some(1999));
    assert_eq!(items[0].episodes, vec!["https://cdn.test/m.m3u8".to_string()]);
    assert_eq!(items[0].relevance_score, 1000.0);
    assert!(items[1].relevance_score > 0.0 && items[1].relevance_score < 1000.0);
    assert!(items.iter().all(|it| it.latency_ms == latency_ms));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let src = source_for(&server);
    let outcome = fetcher(2_000).fetch(&query("x"), &src, CancellationToken::new()).await;
    assert_eq!(failure_reason(outcome), FetchFailure::Status(503));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"list": []}))
                .set_delay(Duration::from_millis(1_500)),
        )
        .mount(&server)
        .await;

    let src = source_for(&server);
    let outcome = fetcher(200).fetch(&query("x"), &src, CancellationToken::new()).await;
    assert!(outcome.latency_ms() < 1_500);
    assert_eq!(failure_reason(outcome), FetchFailure::Timeout(200));
}

#[tokio::test]
async fn garbage_body_is_malformed_but_null_list_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("wd", "broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("wd", "nothing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 1, "list": null})))
        .mount(&server)
        .await;

    let src = source_for(&server);
    let f = fetcher(2_000);

    let broken = f.fetch(&query("broken"), &src, CancellationToken::new()).await;
    assert!(matches!(failure_reason(broken), FetchFailure::Malformed(_)));

    let empty = f.fetch(&query("nothing"), &src, CancellationToken::new()).await;
    assert!(matches!(empty, FetchOutcome::Success { ref items, .. } if items.is_empty()));
}

#[tokio::test]
async fn cancellation_wins_over_a_pending_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let src = source_for(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let outcome = fetcher(10_000).fetch(&query("x"), &src, cancel).await;
    assert_eq!(failure_reason(outcome), FetchFailure::Cancelled);
}

#[tokio::test]
async fn unreachable_upstream_is_transport_failure() {
    let src = SourceDescriptor {
        id: "down".into(),
        display_name: "Down".into(),
        endpoint: "http://127.0.0.1:9/api".into(),
        enabled: true,
    };
    let outcome = fetcher(2_000).fetch(&query("x"), &src, CancellationToken::new()).await;
    assert!(matches!(failure_reason(outcome), FetchFailure::Transport(_)));
}
