// src/stream/mod.rs
//! Wire protocol for the live search stream.
//!
//! Every event is one `data: <json>` line followed by a blank line. The JSON object carries a
//! `type` tag (`start`, `videos`, `progress`, `complete`, `error`) and camelCase fields.

pub mod decode;
pub mod encode;

use serde::{Deserialize, Serialize};

use crate::types::ResultItem;

pub use decode::StreamDecoder;
pub use encode::{encode, event_stream, single_error_stream};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        total_sources: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Videos {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_display_name: Option<String>,
        videos: Vec<ResultItem>,
        completed_sources: usize,
        total_sources: usize,
        latency: u64,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        completed_sources: usize,
        total_sources: usize,
        total_videos_found: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default)]
        failed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        total_videos_found: usize,
        total_sources: usize,
    },
    Error {
        message: String,
    },
}

impl SearchEvent {
    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchEvent::Complete { .. } | SearchEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SearchEvent::Start { .. } => "start",
            SearchEvent::Videos { .. } => "videos",
            SearchEvent::Progress { .. } => "progress",
            SearchEvent::Complete { .. } => "complete",
            SearchEvent::Error { .. } => "error",
        }
    }
}
