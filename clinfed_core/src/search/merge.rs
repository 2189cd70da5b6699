//! Cross-server deduplication and ranking.
//!
//! Both steps are pure and independent of the order branches completed in:
//! every comparison falls through to the server id so equal inputs always
//! produce the same output.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{ResourceType, SearchResult};

/// Lower-case and collapse runs of whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn dedup_key(result: &SearchResult) -> (String, ResourceType) {
    (normalize_title(&result.title), result.resource_type)
}

/// Total order of preference: higher-priority server first, then higher
/// confidence, then server id.
fn preference(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.server_priority
        .cmp(&b.server_priority)
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.server_id.cmp(&b.server_id))
}

/// Collapse results sharing a dedup key into the preferred one.
pub fn deduplicate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut best: HashMap<(String, ResourceType), SearchResult> = HashMap::new();
    for result in results {
        let key = dedup_key(&result);
        match best.get_mut(&key) {
            Some(current) => {
                if preference(&result, current) == Ordering::Less {
                    *current = result;
                }
            }
            None => {
                best.insert(key, result);
            }
        }
    }
    best.into_values().collect()
}

/// Sort by server priority ascending, then confidence descending.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        preference(a, b).then_with(|| normalize_title(&a.title).cmp(&normalize_title(&b.title)))
    });
}

pub fn merge_and_rank(results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    let mut merged = deduplicate(results);
    rank(&mut merged);
    merged.truncate(max_results);
    merged
}
