// src/dispatch.rs
//! Scatter/gather dispatcher.
//!
//! One tokio task per source; each task reports its outcome over a channel to a single
//! coordinator, which alone owns the counters and emits `DispatchEvent`s in completion order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchFailure;
use crate::fetch::{FetchOutcome, SourceFetcher};
use crate::telemetry::query_fingerprint;
use crate::types::{ResultItem, SearchQuery, SourceDescriptor, SourceProgress};

/// Live events of one dispatch, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Always first.
    Started { total_sources: usize },
    /// A source succeeded with at least one item. Always followed by its `Progress`.
    SourceCompleted {
        source: SourceDescriptor,
        items: Vec<ResultItem>,
        latency_ms: u64,
        completed_sources: usize,
        total_sources: usize,
    },
    /// Emitted after every completion, successful or not.
    Progress {
        progress: SourceProgress,
        completed_sources: usize,
        total_sources: usize,
        total_items_found: usize,
    },
    /// Always last.
    Finished {
        total_items_found: usize,
        total_sources: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Extra attempts per failing source. Zero disables retries.
    pub retries: u8,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
    /// Hard ceiling for the whole dispatch. Sources still running when it expires count as
    /// timed out.
    pub session_budget: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_backoff: Duration::from_millis(250),
            session_budget: Duration::from_secs(20),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("search_source_fetch_total", "Source fetches completed, by source.");
        describe_counter!(
            "search_source_failures_total",
            "Source fetches that failed (timeout, status, transport, payload)."
        );
        describe_counter!("search_items_found_total", "Items returned by all sources.");
        describe_histogram!("search_source_latency_ms", "Per-source fetch latency in milliseconds.");
    });
}

#[derive(Clone)]
pub struct Dispatcher {
    fetcher: Arc<dyn SourceFetcher>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self::with_options(fetcher, DispatchOptions::default())
    }

    pub fn with_options(fetcher: Arc<dyn SourceFetcher>, options: DispatchOptions) -> Self {
        Self { fetcher, options }
    }

    /// Fan `query` out to `sources` and return the live event stream.
    ///
    /// `Started` is queued before any fetch is spawned. Cancelling `cancel` stops forwarding and
    /// cancels every in-flight fetch. Dropping only the receiver does not cancel: fetches run to
    /// completion unobserved, so callers that own the consumer (the SSE body) tie `cancel` to
    /// its lifetime. Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        query: SearchQuery,
        sources: Vec<SourceDescriptor>,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<DispatchEvent> {
        ensure_metrics_described();

        let (tx, rx) = mpsc::unbounded_channel();
        let total_sources = sources.len();
        let _ = tx.send(DispatchEvent::Started { total_sources });

        tracing::info!(
            target: "dispatch",
            query = %query_fingerprint(query.text()),
            page = query.page(),
            total_sources,
            "dispatch started"
        );

        let query = Arc::new(query);
        let fetch_cancel = cancel.child_token();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<(usize, FetchOutcome)>();

        let mut pending = BTreeMap::new();
        for (idx, source) in sources.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let query = Arc::clone(&query);
            let token = fetch_cancel.clone();
            let done_tx = done_tx.clone();
            let options = self.options;
            let task_source = source.clone();
            tokio::spawn(async move {
                let outcome =
                    fetch_with_retries(fetcher.as_ref(), &query, &task_source, token, options).await;
                // Coordinator may be gone (cancelled); nothing to do then.
                let _ = done_tx.send((idx, outcome));
            });
            pending.insert(idx, source);
        }
        drop(done_tx);

        let coordinator = Coordinator {
            tx,
            pending,
            total_sources,
            completed: 0,
            total_items: 0,
            observed: true,
        };
        tokio::spawn(coordinator.run(done_rx, cancel, fetch_cancel, self.options.session_budget));

        rx
    }
}

async fn fetch_with_retries(
    fetcher: &dyn SourceFetcher,
    query: &SearchQuery,
    source: &SourceDescriptor,
    cancel: CancellationToken,
    options: DispatchOptions,
) -> FetchOutcome {
    let mut attempt: u8 = 0;
    loop {
        let outcome = fetcher.fetch(query, source, cancel.clone()).await;
        let retryable = matches!(
            &outcome,
            FetchOutcome::Failure { reason, .. } if *reason != FetchFailure::Cancelled
        );
        if !retryable || attempt >= options.retries {
            return outcome;
        }
        attempt += 1;
        let backoff = options.retry_backoff * 2u32.pow(u32::from(attempt - 1));
        tracing::debug!(target: "dispatch", source = %source.id, attempt, "retrying source");
        tokio::select! {
            _ = cancel.cancelled() => return outcome,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Single owner of the dispatch counters.
struct Coordinator {
    tx: mpsc::UnboundedSender<DispatchEvent>,
    pending: BTreeMap<usize, SourceDescriptor>,
    total_sources: usize,
    completed: usize,
    total_items: usize,
    /// False once the consumer went away; we keep draining silently.
    observed: bool,
}

impl Coordinator {
    async fn run(
        mut self,
        mut done_rx: mpsc::UnboundedReceiver<(usize, FetchOutcome)>,
        cancel: CancellationToken,
        fetch_cancel: CancellationToken,
        budget: Duration,
    ) {
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);

        while !self.pending.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "dispatch", completed = self.completed, "dispatch cancelled");
                    return;
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        target: "dispatch",
                        remaining = self.pending.len(),
                        "session budget exhausted"
                    );
                    fetch_cancel.cancel();
                    let budget_ms = budget.as_millis() as u64;
                    let remaining: Vec<usize> = self.pending.keys().copied().collect();
                    for idx in remaining {
                        self.complete(idx, FetchOutcome::Failure {
                            reason: FetchFailure::Timeout(budget_ms),
                            latency_ms: budget_ms,
                        });
                    }
                }
                next = done_rx.recv() => match next {
                    Some((idx, outcome)) => self.complete(idx, outcome),
                    None => break,
                },
            }
        }

        self.emit(DispatchEvent::Finished {
            total_items_found: self.total_items,
            total_sources: self.total_sources,
        });
        tracing::info!(
            target: "dispatch",
            total_items = self.total_items,
            total_sources = self.total_sources,
            "dispatch finished"
        );
    }

    fn complete(&mut self, idx: usize, outcome: FetchOutcome) {
        let Some(source) = self.pending.remove(&idx) else {
            return;
        };
        self.completed += 1;

        let latency_ms = outcome.latency_ms();
        counter!("search_source_fetch_total", "source" => source.id.clone()).increment(1);
        histogram!("search_source_latency_ms").record(latency_ms as f64);

        let (item_count, failed) = match outcome {
            FetchOutcome::Success { items, latency_ms } => {
                let n = items.len();
                self.total_items += n;
                counter!("search_items_found_total").increment(n as u64);
                if n > 0 {
                    self.emit(DispatchEvent::SourceCompleted {
                        source: source.clone(),
                        items,
                        latency_ms,
                        completed_sources: self.completed,
                        total_sources: self.total_sources,
                    });
                }
                (n, false)
            }
            FetchOutcome::Failure { .. } => {
                counter!("search_source_failures_total", "source" => source.id.clone())
                    .increment(1);
                (0, true)
            }
        };

        self.emit(DispatchEvent::Progress {
            progress: SourceProgress {
                source_id: source.id,
                item_count,
                latency_ms,
                failed,
            },
            completed_sources: self.completed,
            total_sources: self.total_sources,
            total_items_found: self.total_items,
        });
    }

    fn emit(&mut self, ev: DispatchEvent) {
        if self.observed && self.tx.send(ev).is_err() {
            self.observed = false;
            tracing::info!(
                target: "dispatch",
                "event consumer disconnected; remaining fetches run unobserved"
            );
        }
    }
}
