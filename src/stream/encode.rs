// src/stream/encode.rs
//! Server side: dispatcher events to wire frames and SSE events.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SearchEvent;
use crate::dispatch::DispatchEvent;

/// Map one dispatcher event to its wire form.
///
/// Items of a `videos` batch are re-tagged with the batch's source and latency so the wire
/// never disagrees with itself.
pub fn encode(ev: DispatchEvent) -> SearchEvent {
    match ev {
        DispatchEvent::Started { total_sources } => SearchEvent::Start {
            total_sources,
            query: None,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        },
        DispatchEvent::SourceCompleted {
            source,
            mut items,
            latency_ms,
            completed_sources,
            total_sources,
        } => {
            for it in items.iter_mut() {
                it.source_id.clone_from(&source.id);
                it.source_display_name = Some(source.display_name.clone());
                it.latency_ms = latency_ms;
            }
            SearchEvent::Videos {
                source: source.id,
                source_display_name: Some(source.display_name),
                videos: items,
                completed_sources,
                total_sources,
                latency: latency_ms,
            }
        }
        DispatchEvent::Progress {
            progress,
            completed_sources,
            total_sources,
            total_items_found,
        } => SearchEvent::Progress {
            completed_sources,
            total_sources,
            total_videos_found: total_items_found,
            source: Some(progress.source_id),
            failed: progress.failed,
            latency: Some(progress.latency_ms),
        },
        DispatchEvent::Finished {
            total_items_found,
            total_sources,
        } => SearchEvent::Complete {
            total_videos_found: total_items_found,
            total_sources,
        },
    }
}

impl SearchEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// One complete wire frame: `data: <json>\n\n`.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }

    pub fn to_sse(&self) -> serde_json::Result<Event> {
        Ok(Event::default().data(self.to_json()?))
    }
}

/// SSE body for one dispatch. Ends right after `complete` (or when the dispatcher goes away).
///
/// The body owns `cancel`: dropping it (client disconnect, superseded search) cancels the
/// dispatch and every in-flight fetch.
pub fn event_stream(
    mut rx: mpsc::UnboundedReceiver<DispatchEvent>,
    query: String,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = cancel.drop_guard();
    async_stream::stream! {
        let _guard = guard;
        while let Some(ev) = rx.recv().await {
            let mut wire = encode(ev);
            if let SearchEvent::Start { query: q, .. } = &mut wire {
                *q = Some(query.clone());
            }
            match wire.to_sse() {
                Ok(sse) => yield Ok(sse),
                Err(e) => {
                    tracing::error!(target: "stream", error = %e, kind = wire.kind(), "event serialization failed");
                    continue;
                }
            }
            if wire.is_terminal() {
                break;
            }
        }
    }
}

/// SSE body carrying a single `error` event.
pub fn single_error_stream(message: String) -> impl Stream<Item = Result<Event, Infallible>> {
    let ev = SearchEvent::Error { message };
    let sse = ev
        .to_sse()
        .unwrap_or_else(|_| Event::default().data(r#"{"type":"error","message":"internal error"}"#));
    futures::stream::once(async move { Ok(sse) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResultItem, SourceDescriptor, SourceProgress};

    #[test]
    fn videos_batch_is_retagged() {
        let source = SourceDescriptor {
            id: "a".into(),
            display_name: "Alpha".into(),
            endpoint: "https://a.test".into(),
            enabled: true,
        };
        let items = vec![ResultItem::new("wrong", "1", "Matrix")];
        let ev = encode(DispatchEvent::SourceCompleted {
            source,
            items,
            latency_ms: 120,
            completed_sources: 1,
            total_sources: 3,
        });
        let SearchEvent::Videos { videos, source, .. } = ev else {
            panic!("expected videos");
        };
        assert_eq!(source, "a");
        assert_eq!(videos[0].source_id, "a");
        assert_eq!(videos[0].source_display_name.as_deref(), Some("Alpha"));
        assert_eq!(videos[0].latency_ms, 120);
    }

    #[test]
    fn frame_layout_matches_wire_contract() {
        let ev = encode(DispatchEvent::Progress {
            progress: SourceProgress {
                source_id: "b".into(),
                item_count: 0,
                latency_ms: 50,
                failed: false,
            },
            completed_sources: 1,
            total_sources: 3,
            total_items_found: 0,
        });
        let frame = ev.to_frame().unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        let v: serde_json::Value = serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["completedSources"], 1);
        assert_eq!(v["totalSources"], 3);
        assert_eq!(v["totalVideosFound"], 0);
    }

    #[test]
    fn complete_frame_fields() {
        let ev = encode(DispatchEvent::Finished {
            total_items_found: 2,
            total_sources: 3,
        });
        let json = ev.to_json().unwrap();
        assert_eq!(json, r#"{"type":"complete","totalVideosFound":2,"totalSources":3}"#);
        assert!(ev.is_terminal());
    }
}
