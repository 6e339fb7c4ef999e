// src/fetch/normalize.rs
//! Normalization of heterogeneous upstream payloads into `ResultItem`s.
//!
//! Upstreams mostly speak the video CMS collection format (`{"list":[{"vod_id":..}]}`), but
//! plenty wrap it (`{"data":{"list":[..]}}`), flatten it (`{"data":[..]}`), or use plain field
//! names. Every shape is read through the same key-fallback tables below.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::FetchFailure;
use crate::types::{ResultItem, SourceDescriptor};

const ID_KEYS: &[&str] = &["vod_id", "id"];
const TITLE_KEYS: &[&str] = &["vod_name", "title", "name"];
const POSTER_KEYS: &[&str] = &["vod_pic", "poster", "pic", "cover"];
const REMARKS_KEYS: &[&str] = &["vod_remarks", "remarks", "note"];
const TYPE_KEYS: &[&str] = &["type_name", "vod_class", "type", "class"];
const YEAR_KEYS: &[&str] = &["vod_year", "year"];
const ACTOR_KEYS: &[&str] = &["vod_actor", "actor", "actors"];
const DIRECTOR_KEYS: &[&str] = &["vod_director", "director"];
const DESC_KEYS: &[&str] = &["vod_content", "vod_blurb", "description", "desc", "content"];
const PLAY_URL_KEYS: &[&str] = &["vod_play_url", "play_url"];

/// Max characters kept for free-text fields.
const TEXT_CAP: usize = 1500;

/// Parse a raw upstream body into items tagged with `source`.
///
/// Scores and latency are left at zero; the fetcher fills them in.
pub fn parse_items(body: &[u8], source: &SourceDescriptor) -> Result<Vec<ResultItem>, FetchFailure> {
    let root: Value =
        serde_json::from_slice(body).map_err(|e| FetchFailure::Malformed(e.to_string()))?;
    let list = locate_list(&root)
        .ok_or_else(|| FetchFailure::Malformed("no item list in payload".into()))?;

    let items = list
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| normalize_item(obj, source))
        .collect();
    Ok(items)
}

fn locate_list(root: &Value) -> Option<&[Value]> {
    if let Some(arr) = root.as_array() {
        return Some(arr);
    }
    let obj = root.as_object()?;
    for key in ["list", "results"] {
        match obj.get(key) {
            Some(Value::Array(arr)) => return Some(arr),
            // Some CMS builds send `"list": null` for no hits.
            Some(Value::Null) => return Some(&[]),
            _ => {}
        }
    }
    match obj.get("data") {
        Some(Value::Array(arr)) => Some(arr),
        Some(nested @ Value::Object(_)) => locate_list(nested),
        _ => None,
    }
}

fn normalize_item(obj: &Map<String, Value>, source: &SourceDescriptor) -> Option<ResultItem> {
    let external_id = pick_string(obj, ID_KEYS)?;
    let title = pick_string(obj, TITLE_KEYS).map(|t| clean_text(&t))?;
    if title.is_empty() {
        return None;
    }

    let mut item = ResultItem::new(source.id.clone(), external_id, title);
    item.source_display_name = Some(source.display_name.clone());
    item.poster_url = pick_string(obj, POSTER_KEYS);
    item.remarks_text = pick_clean(obj, REMARKS_KEYS);
    item.type_name = pick_clean(obj, TYPE_KEYS);
    item.year = pick_string(obj, YEAR_KEYS).and_then(|y| parse_year(&y));
    item.actor = pick_clean(obj, ACTOR_KEYS);
    item.director = pick_clean(obj, DIRECTOR_KEYS);
    item.description = pick_clean(obj, DESC_KEYS);
    item.episodes = pick_string(obj, PLAY_URL_KEYS)
        .map(|raw| parse_episodes(&raw))
        .unwrap_or_default();
    Some(item)
}

/// First non-empty value among `keys`, numbers rendered as strings.
fn pick_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn pick_clean(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    pick_string(obj, keys)
        .map(|s| clean_text(&s))
        .filter(|s| !s.is_empty())
}

/// Decode entities, strip tags, collapse whitespace, cap length.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > TEXT_CAP {
        out = out.chars().take(TEXT_CAP).collect();
    }
    out
}

fn parse_year(raw: &str) -> Option<i32> {
    static RE_YEAR: OnceCell<Regex> = OnceCell::new();
    let re = RE_YEAR.get_or_init(|| Regex::new(r"(1[89]|2\d)\d{2}").expect("year regex"));
    re.find(raw)?.as_str().parse().ok()
}

/// Extract playable URLs from a CMS play list.
///
/// Format: groups joined by `$$$`, episodes by `#`, each episode `label$url` (label optional).
/// The first group with m3u8 links wins; otherwise the first non-empty group.
pub fn parse_episodes(raw: &str) -> Vec<String> {
    let groups: Vec<Vec<String>> = raw
        .split("$$$")
        .map(|group| {
            group
                .split('#')
                .filter_map(|ep| {
                    let url = ep.rsplit('$').next()?.trim();
                    (url.starts_with("http://") || url.starts_with("https://"))
                        .then(|| url.to_string())
                })
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect();

    let preferred = groups
        .iter()
        .position(|g| g.iter().any(|u| u.contains(".m3u8")))
        .unwrap_or(0);
    groups.into_iter().nth(preferred).unwrap_or_default()
}
