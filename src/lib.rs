// src/lib.rs
// Public library surface for the binary, the CLI and integration tests.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod metrics;
pub mod registry;
pub mod scoring;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod types;

use std::sync::Arc;

use shuttle_axum::axum::Router;

pub use crate::api::{router, AppState};
pub use crate::config::AggregatorConfig;
pub use crate::dispatch::{DispatchEvent, DispatchOptions, Dispatcher};
pub use crate::error::{DecodeError, FetchFailure, SearchError};
pub use crate::fetch::{FetchOutcome, HttpFetcher, SourceFetcher};
pub use crate::merge::SortMode;
pub use crate::registry::{SourceRegistry, StaticSourceRegistry};
pub use crate::scoring::RelevanceScorer;
pub use crate::session::{SearchSession, SessionController, SessionId, SessionStatus};
pub use crate::stream::{SearchEvent, StreamDecoder};
pub use crate::types::{ResultItem, SearchQuery, SearchRequest, SourceDescriptor, SourceProgress};

/// Full in-process app from config files and env: API routes plus `/metrics`.
pub fn app() -> anyhow::Result<Router> {
    let cfg = AggregatorConfig::load_default()?;
    let registry = StaticSourceRegistry::load_default()?;
    build_app(&cfg, Arc::new(registry))
}

/// Same as [`app`] with explicit config and registry.
pub fn build_app(cfg: &AggregatorConfig, registry: Arc<dyn SourceRegistry>) -> anyhow::Result<Router> {
    let fetcher = HttpFetcher::new(cfg.source_timeout())?;
    let dispatcher = Dispatcher::with_options(Arc::new(fetcher), cfg.dispatch_options());
    let metrics = crate::metrics::Metrics::init(cfg.source_timeout_ms, cfg.session_budget_ms)?;
    tracing::info!(
        sources = registry.list_enabled_sources().len(),
        source_timeout_ms = cfg.source_timeout_ms,
        session_budget_ms = cfg.session_budget_ms,
        retries = cfg.retries,
        "aggregator configured"
    );
    Ok(router(AppState { registry, dispatcher }).merge(metrics.router()))
}

/// Client-side controller wired to the file cache when one is configured.
pub fn session_controller(cfg: &AggregatorConfig) -> SessionController {
    let controller = SessionController::new();
    match &cfg.cache_dir {
        Some(dir) => controller.with_cache(Arc::new(cache::FileResultCache::new(dir))),
        None => controller,
    }
}
