// src/api.rs
//! HTTP surface: health, source listing and the streaming search endpoint.

use std::convert::Infallible;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use metrics::counter;
use serde::Deserialize;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::client::STREAM_PATH;
use crate::dispatch::Dispatcher;
use crate::registry::SourceRegistry;
use crate::stream::{event_stream, single_error_stream};
use crate::telemetry::query_fingerprint;
use crate::types::{SearchRequest, SourceDescriptor};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn SourceRegistry>,
    pub dispatcher: Dispatcher,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/sources", get(list_sources))
        .route(STREAM_PATH, get(search_stream_get).post(search_stream_post))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceDescriptor>> {
    Json(state.registry.list_enabled_sources())
}

/// Query-string form for plain `EventSource` clients: `?q=..&sources=a,b&page=2`.
#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default, alias = "query")]
    q: String,
    #[serde(default)]
    sources: Option<String>,
    #[serde(default)]
    page: Option<u32>,
}

impl From<StreamParams> for SearchRequest {
    fn from(p: StreamParams) -> Self {
        let ids = p
            .sources
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut req = SearchRequest::new(p.q).with_sources(ids);
        req.page = p.page.unwrap_or(1);
        req
    }
}

async fn search_stream_get(State(state): State<AppState>, Query(params): Query<StreamParams>) -> Response {
    start_stream(&state, params.into())
}

async fn search_stream_post(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Response {
    start_stream(&state, req)
}

type EventBody = BoxStream<'static, Result<Event, Infallible>>;

/// Validation failures are reported in-band as a single `error` event; the HTTP status is 200
/// either way so stream consumers have one code path.
fn start_stream(state: &AppState, req: SearchRequest) -> Response {
    counter!("search_sessions_total").increment(1);

    let resolved = req
        .to_query()
        .and_then(|q| state.registry.resolve(&q).map(|sources| (q, sources)));

    let body: EventBody = match resolved {
        Ok((query, sources)) => {
            tracing::info!(
                target: "api",
                query = %query_fingerprint(query.text()),
                sources = sources.len(),
                "search stream opened"
            );
            let text = query.text().to_string();
            let cancel = CancellationToken::new();
            let rx = state.dispatcher.dispatch(query, sources, cancel.clone());
            event_stream(rx, text, cancel).boxed()
        }
        Err(e) => {
            counter!("search_validation_errors_total").increment(1);
            tracing::warn!(target: "api", error = %e, "search rejected");
            single_error_stream(e.to_string()).boxed()
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(body).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_params_become_request() {
        let p = StreamParams {
            q: " matrix ".into(),
            sources: Some("a, b,,".into()),
            page: None,
        };
        let req: SearchRequest = p.into();
        assert_eq!(req.source_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(req.page, 1);
        assert_eq!(req.to_query().unwrap().text(), "matrix");
    }
}
