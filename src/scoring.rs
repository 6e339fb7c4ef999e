// src/scoring.rs
//! Relevance scoring for search hits.
//!
//! Heuristic, additive, higher wins. The scorer captures the "current year" at construction
//! so a single instance is a pure function of `(item, query)` for the life of a session.

use chrono::Datelike;

use crate::types::ResultItem;

pub const EXACT_MATCH: f64 = 1000.0;
/// Non-exact scores never reach an exact match.
pub const NON_EXACT_CAP: f64 = EXACT_MATCH - 1.0;

const PREFIX_BONUS: f64 = 500.0;
const CONTAINS_BONUS: f64 = 300.0;
const POSITION_BONUS_MAX: f64 = 50.0;
const ALL_WORDS_BONUS: f64 = 200.0;
const WORD_BONUS: f64 = 50.0;
const WORD_AT_START_BONUS: f64 = 25.0;
const ACTOR_BONUS: f64 = 80.0;
const DIRECTOR_BONUS: f64 = 60.0;
const DESCRIPTION_BONUS: f64 = 20.0;
const RECENCY_BONUS: [f64; 3] = [30.0, 20.0, 10.0];
const LONG_TITLE_CHARS: usize = 30;
const LONG_TITLE_PENALTY: f64 = 10.0;
const QUALITY_BONUS: f64 = 10.0;
const QUALITY_BONUS_MAX: f64 = 30.0;

/// Lowercase markers in the remarks field that hint at a complete or high-quality entry.
const QUALITY_MARKERS: &[&str] = &[
    "4k", "2160p", "1080p", "hd", "bd", "蓝光", "高清", "完结", "全集", "complete",
];

#[derive(Debug, Clone, Copy)]
pub struct RelevanceScorer {
    current_year: i32,
}

impl RelevanceScorer {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    /// Scorer pinned to the local calendar year.
    pub fn for_today() -> Self {
        Self::new(chrono::Local::now().year())
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    /// Score `item` against `query`. Always `>= 0`.
    pub fn score(&self, item: &ResultItem, query: &str) -> f64 {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return 0.0;
        }
        let title = item.title.trim().to_lowercase();

        if title == q {
            return EXACT_MATCH;
        }

        let mut score = 0.0;

        if title.starts_with(&q) {
            score += PREFIX_BONUS;
        }

        if let Some(byte_pos) = title.find(&q) {
            let pos = title[..byte_pos].chars().count() as f64;
            score += CONTAINS_BONUS + (POSITION_BONUS_MAX - pos).max(0.0);
        }

        let words: Vec<&str> = q.split_whitespace().collect();
        if words.len() > 1 && words.iter().all(|w| title.contains(w)) {
            score += ALL_WORDS_BONUS;
        }
        for w in words.iter().filter(|w| w.chars().count() >= 2) {
            if title.contains(w) {
                score += WORD_BONUS;
                if title.starts_with(w) {
                    score += WORD_AT_START_BONUS;
                }
            }
        }

        if field_contains(item.actor.as_deref(), &q) {
            score += ACTOR_BONUS;
        }
        if field_contains(item.director.as_deref(), &q) {
            score += DIRECTOR_BONUS;
        }
        if field_contains(item.description.as_deref(), &q) {
            score += DESCRIPTION_BONUS;
        }

        score += self.recency_bonus(item.year);

        if item.title.trim().chars().count() > LONG_TITLE_CHARS {
            score -= LONG_TITLE_PENALTY;
        }

        score += quality_bonus(item.remarks_text.as_deref());

        score.clamp(0.0, NON_EXACT_CAP)
    }

    fn recency_bonus(&self, year: Option<i32>) -> f64 {
        let Some(year) = year else {
            return 0.0;
        };
        let age = (self.current_year - year).max(0) as usize;
        RECENCY_BONUS.get(age).copied().unwrap_or(0.0)
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::for_today()
    }
}

fn field_contains(field: Option<&str>, q: &str) -> bool {
    field.is_some_and(|f| f.to_lowercase().contains(q))
}

fn quality_bonus(remarks: Option<&str>) -> f64 {
    let Some(r) = remarks else {
        return 0.0;
    };
    let r = r.to_lowercase();
    let hits = QUALITY_MARKERS.iter().filter(|m| r.contains(*m)).count() as f64;
    (hits * QUALITY_BONUS).min(QUALITY_BONUS_MAX)
}
