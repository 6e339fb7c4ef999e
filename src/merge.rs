// src/merge.rs
//! Incremental ranked merge plus the final sort modes.
//!
//! While a session runs, each arriving batch is spliced into place by binary search on
//! (relevance desc, latency asc). The list is sorted between any two observable states; the
//! full stable re-sort happens once, at completion.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::ResultItem;

/// Live ordering: higher relevance first, faster source first on ties.
pub fn rank_cmp(a: &ResultItem, b: &ResultItem) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then(a.latency_ms.cmp(&b.latency_ms))
}

/// Insert `batch` into the already sorted `list`, keeping it sorted.
///
/// Items equal under `rank_cmp` land after existing equals.
pub fn insert_batch(list: &mut Vec<ResultItem>, batch: impl IntoIterator<Item = ResultItem>) {
    for item in batch {
        let pos = list.partition_point(|x| rank_cmp(x, &item) != Ordering::Greater);
        list.insert(pos, item);
    }
}

pub fn is_ranked(list: &[ResultItem]) -> bool {
    list.windows(2).all(|w| rank_cmp(&w[0], &w[1]) != Ordering::Greater)
}

/// Caller-selected ordering applied once when a session completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Relevance,
    Latency,
    ReleaseDate,
    Alphabetical,
    Source,
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "relevance" | "default" => Ok(SortMode::Relevance),
            "latency" | "speed" => Ok(SortMode::Latency),
            "release_date" | "year" | "date" => Ok(SortMode::ReleaseDate),
            "alphabetical" | "title" | "name" => Ok(SortMode::Alphabetical),
            "source" => Ok(SortMode::Source),
            other => Err(format!("unknown sort mode: {other}")),
        }
    }
}

/// Stable full sort by `mode`. Ties fall back to the live ranking.
pub fn final_sort(list: &mut [ResultItem], mode: SortMode) {
    match mode {
        SortMode::Relevance => list.sort_by(rank_cmp),
        SortMode::Latency => list.sort_by(|a, b| {
            a.latency_ms
                .cmp(&b.latency_ms)
                .then_with(|| b.relevance_score.total_cmp(&a.relevance_score))
        }),
        // Unknown years sink to the bottom.
        SortMode::ReleaseDate => list.sort_by(|a, b| {
            b.year
                .unwrap_or(i32::MIN)
                .cmp(&a.year.unwrap_or(i32::MIN))
                .then_with(|| rank_cmp(a, b))
        }),
        SortMode::Alphabetical => list.sort_by_cached_key(|it| it.title.to_lowercase()),
        SortMode::Source => list.sort_by(|a, b| a.source_id.cmp(&b.source_id).then_with(|| rank_cmp(a, b))),
    }
}
