// src/session.rs
//! Client-side session state machine.
//!
//! `Idle -> Running -> {Completed, Aborted}`. Each search gets a fresh `SearchSession` with its
//! own `SessionId`; events are delivered tagged with the id of the stream that produced them and
//! anything not addressed to the current running session is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CachedSearch, ResultCache};
use crate::merge::{final_sort, insert_batch, SortMode};
use crate::scoring::RelevanceScorer;
use crate::stream::SearchEvent;
use crate::telemetry::query_fingerprint;
use crate::types::{ResultItem, SearchQuery, SourceProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Aborted,
}

/// What handling one event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Stale id, terminal session, or nothing to change.
    Ignored,
    Updated,
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SearchSession {
    id: SessionId,
    query: SearchQuery,
    started_at: DateTime<Utc>,
    completed_sources: usize,
    total_sources: usize,
    total_items_found: usize,
    items: Vec<ResultItem>,
    sources: Vec<SourceProgress>,
    batch_sizes: HashMap<String, usize>,
    status: SessionStatus,
    partial: bool,
    error: Option<String>,
}

impl SearchSession {
    fn new(id: SessionId, query: SearchQuery) -> Self {
        Self {
            id,
            query,
            started_at: Utc::now(),
            completed_sources: 0,
            total_sources: 0,
            total_items_found: 0,
            items: Vec::new(),
            sources: Vec::new(),
            batch_sizes: HashMap::new(),
            status: SessionStatus::Running,
            partial: false,
            error: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_sources(&self) -> usize {
        self.completed_sources
    }

    pub fn total_sources(&self) -> usize {
        self.total_sources
    }

    pub fn total_items_found(&self) -> usize {
        self.total_items_found
    }

    /// Ranked items. Sorted at every observable point.
    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    /// One record per source that has completed, in completion order.
    pub fn sources(&self) -> &[SourceProgress] {
        &self.sources
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Completed because the stream ended without `complete`.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn advance_completed(&mut self, completed: usize, total: usize) {
        if total > self.total_sources {
            self.total_sources = total;
        }
        self.completed_sources = self.completed_sources.max(completed).min(self.total_sources);
    }

    fn apply(&mut self, ev: SearchEvent, scorer: &RelevanceScorer) -> Applied {
        match ev {
            SearchEvent::Start { total_sources, .. } => {
                self.total_sources = self.total_sources.max(total_sources);
                Applied::Updated
            }
            SearchEvent::Videos {
                source,
                source_display_name,
                videos,
                completed_sources,
                total_sources,
                latency,
            } => {
                let text = self.query.text().to_string();
                let batch: Vec<ResultItem> = videos
                    .into_iter()
                    .map(|mut it| {
                        it.source_id.clone_from(&source);
                        if it.source_display_name.is_none() {
                            it.source_display_name.clone_from(&source_display_name);
                        }
                        if it.latency_ms == 0 {
                            it.latency_ms = latency;
                        }
                        it.relevance_score = scorer.score(&it, &text);
                        it
                    })
                    .collect();
                *self.batch_sizes.entry(source).or_default() += batch.len();
                insert_batch(&mut self.items, batch);
                self.advance_completed(completed_sources, total_sources);
                self.total_items_found = self.total_items_found.max(self.items.len());
                Applied::Updated
            }
            SearchEvent::Progress {
                completed_sources,
                total_sources,
                total_videos_found,
                source,
                failed,
                latency,
            } => {
                self.advance_completed(completed_sources, total_sources);
                self.total_items_found = self.total_items_found.max(total_videos_found);
                if let Some(source_id) = source {
                    let item_count = self.batch_sizes.get(&source_id).copied().unwrap_or(0);
                    self.sources.push(SourceProgress {
                        source_id,
                        item_count,
                        latency_ms: latency.unwrap_or(0),
                        failed,
                    });
                }
                Applied::Updated
            }
            SearchEvent::Complete {
                total_videos_found,
                total_sources,
            } => {
                self.total_sources = self.total_sources.max(total_sources);
                self.completed_sources = self.total_sources;
                self.total_items_found = total_videos_found;
                Applied::Completed
            }
            SearchEvent::Error { message } => {
                self.error = Some(message);
                Applied::Aborted
            }
        }
    }
}

/// Owns the current session. Single-threaded by construction: wrap it in one task (see
/// `client::spawn_runner`) rather than sharing it behind a lock.
pub struct SessionController {
    next_id: u64,
    current: Option<SearchSession>,
    sort_mode: SortMode,
    scorer: RelevanceScorer,
    cache: Option<Arc<dyn ResultCache>>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            current: None,
            sort_mode: SortMode::default(),
            scorer: RelevanceScorer::for_today(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = mode;
        self
    }

    /// Applies to the next finalization.
    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    pub fn current(&self) -> Option<&SearchSession> {
        self.current.as_ref()
    }

    /// Start a new session, aborting the running one if any.
    pub fn begin(&mut self, query: SearchQuery) -> SessionId {
        if let Some(prev) = self.current.as_mut().filter(|s| s.is_running()) {
            prev.status = SessionStatus::Aborted;
            tracing::info!(target: "session", session = %prev.id, "superseded by new search");
        }
        self.next_id += 1;
        let id = SessionId(self.next_id);
        tracing::info!(
            target: "session",
            session = %id,
            query = %query_fingerprint(query.text()),
            "session started"
        );
        self.current = Some(SearchSession::new(id, query));
        id
    }

    /// Abort the running session. Returns its id if there was one.
    pub fn cancel(&mut self) -> Option<SessionId> {
        let s = self.current.as_mut().filter(|s| s.is_running())?;
        s.status = SessionStatus::Aborted;
        tracing::info!(target: "session", session = %s.id, "session cancelled");
        Some(s.id)
    }

    /// Apply one decoded event produced by session `id`'s stream.
    pub fn handle(&mut self, id: SessionId, ev: SearchEvent) -> Applied {
        let Some(session) = self.current.as_mut().filter(|s| s.id == id && s.is_running()) else {
            tracing::debug!(target: "session", session = %id, kind = ev.kind(), "discarding stale event");
            return Applied::Ignored;
        };
        match session.apply(ev, &self.scorer) {
            Applied::Completed => {
                self.finalize(false);
                Applied::Completed
            }
            Applied::Aborted => {
                if let Some(s) = self.current.as_mut() {
                    s.status = SessionStatus::Aborted;
                    tracing::warn!(target: "session", session = %s.id, error = ?s.error, "stream reported error");
                }
                Applied::Aborted
            }
            other => other,
        }
    }

    /// The stream for `id` closed. Without a prior `complete` the session finishes with what it
    /// has, marked partial and not cached.
    pub fn end_of_stream(&mut self, id: SessionId) -> Applied {
        if self.running_mut(id).is_none() {
            return Applied::Ignored;
        }
        tracing::warn!(target: "session", session = %id, "stream ended before complete");
        self.finalize(true);
        Applied::Completed
    }

    /// The stream for `id` could not be opened or broke before any event.
    pub fn fail(&mut self, id: SessionId, message: impl Into<String>) -> Applied {
        let Some(s) = self.running_mut(id) else {
            return Applied::Ignored;
        };
        s.error = Some(message.into());
        s.status = SessionStatus::Aborted;
        Applied::Aborted
    }

    /// Restore the last cached search if it is recent enough.
    pub fn load_cached(&self, max_age_secs: u64) -> Option<CachedSearch> {
        self.cache.as_ref()?.load_if_fresh(max_age_secs)
    }

    fn running_mut(&mut self, id: SessionId) -> Option<&mut SearchSession> {
        self.current
            .as_mut()
            .filter(|s| s.id == id && s.is_running())
    }

    fn finalize(&mut self, partial: bool) {
        let mode = self.sort_mode;
        let Some(s) = self.current.as_mut() else {
            return;
        };
        final_sort(&mut s.items, mode);
        s.partial = partial;
        s.status = SessionStatus::Completed;
        tracing::info!(
            target: "session",
            session = %s.id,
            items = s.items.len(),
            sources = s.total_sources,
            partial,
            "session completed"
        );
        if partial {
            return;
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(s.query.text(), &s.items, &s.sources) {
                tracing::warn!(target: "session", error = ?e, "failed to cache search results");
            }
        }
    }
}
