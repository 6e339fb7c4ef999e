// src/config.rs
//! Runtime knobs for the aggregator.
//!
//! Resolution order: built-in defaults, then the TOML file ($AGGREGATOR_CONFIG_PATH or
//! config/aggregator.toml), then individual env overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::DispatchOptions;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

const ENV_SOURCE_TIMEOUT_MS: &str = "SOURCE_TIMEOUT_MS";
const ENV_RETRIES: &str = "SEARCH_RETRIES";
const ENV_CACHE_DIR: &str = "SEARCH_CACHE_DIR";
const ENV_CACHE_MAX_AGE: &str = "SEARCH_CACHE_MAX_AGE_SECS";

fn default_source_timeout_ms() -> u64 {
    8_000
}
fn default_session_budget_ms() -> u64 {
    20_000
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_cache_max_age_secs() -> u64 {
    7_200
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-source fetch timeout.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Wall-clock cap for a whole dispatch.
    #[serde(default = "default_session_budget_ms")]
    pub session_budget_ms: u64,
    #[serde(default)]
    pub retries: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Where the last completed search is kept. No dir, no file cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            session_budget_ms: default_session_budget_ms(),
            retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            cache_dir: None,
            cache_max_age_secs: default_cache_max_age_secs(),
        }
    }
}

impl AggregatorConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let cfg: Self = toml::from_str(&content)
            .with_context(|| format!("parsing aggregator config {}", path.display()))?;
        Ok(cfg.normalized())
    }

    /// File (if any) plus env overrides.
    pub fn load_default() -> Result<Self> {
        let base = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Self::load_from(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(base.with_env_overrides().normalized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u64>(ENV_SOURCE_TIMEOUT_MS) {
            self.source_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u8>(ENV_RETRIES) {
            self.retries = v;
        }
        if let Ok(v) = std::env::var(ENV_CACHE_DIR) {
            let v = v.trim();
            self.cache_dir = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = env_parse::<u64>(ENV_CACHE_MAX_AGE) {
            self.cache_max_age_secs = v;
        }
        self
    }

    /// Zero durations fall back to defaults; the per-source timeout stays below the budget.
    fn normalized(mut self) -> Self {
        if self.session_budget_ms == 0 {
            self.session_budget_ms = default_session_budget_ms();
        }
        if self.source_timeout_ms == 0 {
            self.source_timeout_ms = default_source_timeout_ms();
        }
        if self.source_timeout_ms >= self.session_budget_ms {
            self.source_timeout_ms = self.session_budget_ms.saturating_sub(1).max(1);
        }
        self
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            session_budget: Duration::from_millis(self.session_budget_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(target: "config", key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}
