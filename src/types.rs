// src/types.rs
//! Shared data model: source descriptors, queries, result items and per-source progress.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::SearchError;

/// One upstream content API. Supplied by the registry; read-only to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub id: String,
    #[serde(alias = "name", alias = "display_name")]
    pub display_name: String,
    #[serde(alias = "api", alias = "url")]
    pub endpoint: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A validated search request. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    page: u32,
    source_ids: BTreeSet<String>,
}

impl SearchQuery {
    /// Trim and validate the query. An empty `source_ids` set means "every enabled source".
    pub fn new<I, S>(text: &str, page: u32, source_ids: I) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(SearchError::Validation("query must not be empty".into()));
        }
        let source_ids = source_ids
            .into_iter()
            .map(Into::into)
            .map(|s: String| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            text: text.to_string(),
            page: page.max(1),
            source_ids,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn source_ids(&self) -> &BTreeSet<String> {
        &self.source_ids
    }
}

/// Wire body of a dispatch request: `{query, sourceIds, page}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source_ids: Vec::new(),
            page: 1,
        }
    }

    pub fn with_sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_query(&self) -> Result<SearchQuery, SearchError> {
        SearchQuery::new(&self.query, self.page, self.source_ids.iter().cloned())
    }
}

/// A normalized search hit from one source.
///
/// `relevance_score` and `latency_ms` are computed by the aggregator, never taken from upstream.
/// Identity is `(source_id, external_id)`; the same title from two sources is two items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    #[serde(rename = "id")]
    pub external_id: String,
    pub title: String,
    #[serde(rename = "poster", default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(rename = "remarks", default, skip_serializing_if = "Option::is_none")]
    pub remarks_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(rename = "source")]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<String>,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(rename = "latency", default)]
    pub latency_ms: u64,
}

impl ResultItem {
    /// Minimal item with only the required fields set.
    pub fn new(source_id: impl Into<String>, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            poster_url: None,
            remarks_text: None,
            type_name: None,
            source_id: source_id.into(),
            source_display_name: None,
            year: None,
            actor: None,
            director: None,
            description: None,
            episodes: Vec::new(),
            relevance_score: 0.0,
            latency_ms: 0,
        }
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.source_id, &self.external_id)
    }
}

/// Completion record for one source in one session. Created once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceProgress {
    pub source_id: String,
    pub item_count: usize,
    pub latency_ms: u64,
    pub failed: bool,
}
