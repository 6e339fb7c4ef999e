// tests/cache_file.rs
//
// File-backed result cache: atomic write, freshness window, corrupt file handling.

use std::fs;

use media_search_aggregator::cache::{FileResultCache, ResultCache};
use media_search_aggregator::{ResultItem, SourceProgress};

#[test]
fn save_then_restore_within_max_age() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = FileResultCache::new(tmp.path().join("nested/cache"));

    assert!(cache.load_if_fresh(60).is_none(), "nothing saved yet");

    let items = vec![ResultItem::new("a", "1", "Matrix")];
    let summaries = vec![SourceProgress {
        source_id: "a".into(),
        item_count: 1,
        latency_ms: 120,
        failed: false,
    }];
    cache.save("matrix", &items, &summaries).unwrap();

    assert!(cache.path().exists());
    assert!(!cache.path().with_extension("json.tmp").exists(), "temp file renamed away");

    let hit = cache.load_if_fresh(60).unwrap();
    assert_eq!(hit.query, "matrix");
    assert_eq!(hit.items, items);
    assert_eq!(hit.source_summaries, summaries);
}

#[test]
fn stale_snapshot_is_not_restored() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = FileResultCache::new(tmp.path());
    let old = serde_json::json!({
        "query": "old",
        "items": [],
        "sourceSummaries": [],
        "savedAt": chrono::Utc::now().timestamp() - 10_000
    });
    fs::write(cache.path(), old.to_string()).unwrap();

    assert!(cache.load_if_fresh(7_200).is_none());
    assert!(cache.load_if_fresh(20_000).is_some());
}

#[test]
fn corrupt_file_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = FileResultCache::new(tmp.path());
    fs::write(cache.path(), b"{not json").unwrap();
    assert!(cache.load_if_fresh(60).is_none());

    // A later save replaces it.
    cache.save("q", &[], &[]).unwrap();
    assert_eq!(cache.load_if_fresh(60).unwrap().query, "q");
}
