//! Merge and order hits from several collections

use crate::models::SearchResult;
use crate::store::ScoredPoint;
use std::cmp::Ordering;

/// Turn a store hit into a response row.
///
/// The row id is the caller-facing record id when the payload carries one.
pub fn to_result(hit: ScoredPoint) -> SearchResult {
    let id = hit.payload.record_id.clone().unwrap_or(hit.id);
    SearchResult {
        id,
        score: hit.score,
        content: hit.payload.text().to_string(),
        metadata: hit.payload.to_json(),
    }
}

/// Merge per-collection hits: best score first, ties by id, at most `limit`
pub fn merge(per_collection: Vec<Vec<ScoredPoint>>, limit: usize) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = per_collection
        .into_iter()
        .flatten()
        .map(to_result)
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(limit);
    merged
}
