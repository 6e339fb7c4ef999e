// src/fetch/mod.rs
//! Per-source fetching: one bounded HTTP call per upstream, normalized into `ResultItem`s.

pub mod normalize;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::error::FetchFailure;
use crate::scoring::RelevanceScorer;
use crate::types::{ResultItem, SearchQuery, SourceDescriptor};

pub const DEFAULT_USER_AGENT: &str = "media-search-aggregator/0.1";

/// Result of one source call. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success { items: Vec<ResultItem>, latency_ms: u64 },
    Failure { reason: FetchFailure, latency_ms: u64 },
}

impl FetchOutcome {
    pub fn latency_ms(&self) -> u64 {
        match self {
            FetchOutcome::Success { latency_ms, .. } | FetchOutcome::Failure { latency_ms, .. } => {
                *latency_ms
            }
        }
    }
}

/// One upstream call. Implementations must not retry and must honour `cancel`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        query: &SearchQuery,
        source: &SourceDescriptor,
        cancel: CancellationToken,
    ) -> FetchOutcome;
}

/// Fetcher for JSON video-collection APIs over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    scorer: RelevanceScorer,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            scorer: RelevanceScorer::for_today(),
        }
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, query: &SearchQuery, source: &SourceDescriptor) -> Result<bytes::Bytes, FetchFailure> {
        let page = query.page().to_string();
        let resp = self
            .client
            .get(&source.endpoint)
            .query(&[("ac", "videolist"), ("wd", query.text()), ("pg", page.as_str())])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }
        resp.bytes()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        query: &SearchQuery,
        source: &SourceDescriptor,
        cancel: CancellationToken,
    ) -> FetchOutcome {
        let t0 = Instant::now();

        // Dropping the losing branch drops the request future and releases its connection.
        let body = tokio::select! {
            _ = cancel.cancelled() => Err(FetchFailure::Cancelled),
            res = tokio::time::timeout(self.timeout, self.call(query, source)) => match res {
                Ok(inner) => inner,
                Err(_) => Err(FetchFailure::Timeout(self.timeout.as_millis() as u64)),
            },
        };

        let parsed = body.and_then(|bytes| normalize::parse_items(&bytes, source));
        let latency_ms = t0.elapsed().as_millis() as u64;

        match parsed {
            Ok(mut items) => {
                for it in items.iter_mut() {
                    it.relevance_score = self.scorer.score(it, query.text());
                    it.latency_ms = latency_ms;
                }
                tracing::debug!(
                    target: "fetch",
                    source = %source.id,
                    count = items.len(),
                    latency_ms,
                    "source fetch ok"
                );
                FetchOutcome::Success { items, latency_ms }
            }
            Err(reason) => {
                tracing::warn!(
                    target: "fetch",
                    source = %source.id,
                    error = %reason,
                    latency_ms,
                    "source fetch failed"
                );
                FetchOutcome::Failure { reason, latency_ms }
            }
        }
    }
}
