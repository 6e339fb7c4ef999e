// src/cache.rs
//! Caching collaborator: keeps the last completed search so a caller can restore it.
//!
//! The file-backed store writes one JSON snapshot via temp file + rename, so a crash mid-write
//! never leaves a torn file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{ResultItem, SourceProgress};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSearch {
    pub query: String,
    pub items: Vec<ResultItem>,
    pub source_summaries: Vec<SourceProgress>,
    /// Unix seconds.
    pub saved_at: i64,
}

pub trait ResultCache: Send + Sync {
    fn save(&self, query: &str, items: &[ResultItem], source_summaries: &[SourceProgress]) -> Result<()>;

    /// Last saved search if it is at most `max_age_secs` old.
    fn load_if_fresh(&self, max_age_secs: u64) -> Option<CachedSearch>;
}

fn is_fresh(saved_at: i64, max_age_secs: u64) -> bool {
    let age = Utc::now().timestamp().saturating_sub(saved_at);
    age >= 0 && (age as u64) <= max_age_secs
}

pub struct FileResultCache {
    dir: PathBuf,
}

impl FileResultCache {
    pub const FILE_NAME: &'static str = "last_search.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = fs::create_dir_all(&dir); // best-effort
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

impl ResultCache for FileResultCache {
    fn save(&self, query: &str, items: &[ResultItem], source_summaries: &[SourceProgress]) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;
        let snapshot = CachedSearch {
            query: query.to_string(),
            items: items.to_vec(),
            source_summaries: source_summaries.to_vec(),
            saved_at: Utc::now().timestamp(),
        };
        let json = serde_json::to_vec(&snapshot).context("serializing search snapshot")?;
        Self::write_atomic(&self.path(), &json)
    }

    fn load_if_fresh(&self, max_age_secs: u64) -> Option<CachedSearch> {
        let raw = fs::read(self.path()).ok()?;
        let snap: CachedSearch = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "session", error = %e, "ignoring unreadable search cache");
                return None;
            }
        };
        is_fresh(snap.saved_at, max_age_secs).then_some(snap)
    }
}

/// In-process store, handy for embedding and tests.
#[derive(Default)]
pub struct MemoryResultCache {
    inner: Mutex<Option<CachedSearch>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultCache for MemoryResultCache {
    fn save(&self, query: &str, items: &[ResultItem], source_summaries: &[SourceProgress]) -> Result<()> {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *g = Some(CachedSearch {
            query: query.to_string(),
            items: items.to_vec(),
            source_summaries: source_summaries.to_vec(),
            saved_at: Utc::now().timestamp(),
        });
        Ok(())
    }

    fn load_if_fresh(&self, max_age_secs: u64) -> Option<CachedSearch> {
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        g.clone().filter(|s| is_fresh(s.saved_at, max_age_secs))
    }
}
