// src/registry.rs
//! Source registry: which upstream APIs exist and which are enabled.
//!
//! Loading follows env var + fallbacks:
//! 1) $SOURCES_CONFIG_PATH
//! 2) config/sources.toml
//! 3) config/sources.json

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SearchError;
use crate::types::{SearchQuery, SourceDescriptor};

pub const ENV_SOURCES_PATH: &str = "SOURCES_CONFIG_PATH";

pub trait SourceRegistry: Send + Sync {
    /// Enabled sources in registry order.
    fn list_enabled_sources(&self) -> Vec<SourceDescriptor>;

    /// Sources a query targets. An empty selection means every enabled source; ids the registry
    /// does not know (or has disabled) are skipped.
    fn resolve(&self, query: &SearchQuery) -> Result<Vec<SourceDescriptor>, SearchError> {
        let enabled = self.list_enabled_sources();
        let selected: Vec<SourceDescriptor> = if query.source_ids().is_empty() {
            enabled
        } else {
            enabled
                .into_iter()
                .filter(|s| query.source_ids().contains(&s.id))
                .collect()
        };
        if selected.is_empty() {
            return Err(SearchError::Validation("no enabled source selected".into()));
        }
        Ok(selected)
    }
}

/// Fixed list of sources, typically loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl StaticSourceRegistry {
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        Self {
            sources: clean_sources(sources),
        }
    }

    pub fn all(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// Load from an explicit path. Supports TOML (`[[sources]]`) or a JSON array.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sources from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Ok(Self::new(parse_sources(&content, &ext)?))
    }

    /// Load using env var + fallbacks. No file at all yields an empty registry.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        for candidate in ["config/sources.toml", "config/sources.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        tracing::warn!(target: "registry", "no sources config found; registry is empty");
        Ok(Self::default())
    }
}

impl SourceRegistry for StaticSourceRegistry {
    fn list_enabled_sources(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceDescriptor>> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<SourceDescriptor>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        sources: Vec<SourceDescriptor>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<SourceDescriptor>> {
    Ok(serde_json::from_str(s)?)
}

/// Trim fields, drop entries without id or endpoint, keep the first of duplicate ids.
fn clean_sources(items: Vec<SourceDescriptor>) -> Vec<SourceDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.id = it.id.trim().to_string();
        it.endpoint = it.endpoint.trim().to_string();
        it.display_name = it.display_name.trim().to_string();
        if it.id.is_empty() || it.endpoint.is_empty() {
            tracing::warn!(target: "registry", id = %it.id, "skipping source without id or endpoint");
            continue;
        }
        if it.display_name.is_empty() {
            it.display_name = it.id.clone();
        }
        if seen.insert(it.id.clone()) {
            out.push(it);
        }
    }
    out
}
