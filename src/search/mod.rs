//! Semantic search across one or all collections

mod rank;

pub use rank::*;

use crate::cancel::CancellationToken;
use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::models::{SearchRequest, SearchResponse};
use crate::store::{SearchFilter, VectorStore, Visibility};
use chrono::DateTime;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Build a payload filter from request fields.
///
/// Blank entries are dropped; an unknown visibility or a malformed
/// timestamp is a validation error.
pub fn build_filter(
    namespaces: &[String],
    visibility: &[String],
    tags: &[String],
    ingested_after: Option<&str>,
) -> Result<SearchFilter> {
    let clean = |values: &[String]| -> Vec<String> {
        values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    };

    let visibility = clean(visibility)
        .iter()
        .map(|v| v.parse::<Visibility>())
        .collect::<Result<Vec<_>>>()?;

    let ingested_after_ms = match ingested_after.map(str::trim).filter(|s| !s.is_empty()) {
        Some(ts) => Some(
            DateTime::parse_from_rfc3339(ts)
                .map_err(|e| {
                    Error::validation(format!(
                        "ingested_after must be an RFC3339 timestamp (got '{}'): {}",
                        ts, e
                    ))
                })?
                .timestamp_millis(),
        ),
        None => None,
    };

    Ok(SearchFilter {
        namespaces: clean(namespaces),
        visibility,
        tags: clean(tags),
        ingested_after_ms,
    })
}

/// Clamp a requested limit into `[1, max]`, defaulting when absent
pub fn bounded_limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    match requested {
        Some(n) => (n.max(1) as usize).min(max.max(1)),
        None => default.clamp(1, max.max(1)),
    }
}

/// Clamp a requested threshold into `[0, 1]`, defaulting when absent
pub fn bounded_threshold(requested: Option<f64>, default: f32) -> f32 {
    match requested {
        Some(t) if t.is_finite() => t.clamp(0.0, 1.0) as f32,
        _ => default.clamp(0.0, 1.0),
    }
}

/// Search service handle
#[derive(Clone)]
pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            config,
        }
    }

    pub async fn search(
        &self,
        cancel: &CancellationToken,
        req: &SearchRequest,
    ) -> Result<SearchResponse> {
        let started = Instant::now();

        let query = req
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::validation("query is required"))?
            .to_string();
        let limit = bounded_limit(req.limit, self.config.default_limit, self.config.max_limit);
        let threshold = bounded_threshold(req.threshold, self.config.default_threshold);
        let filter = build_filter(
            &req.namespaces,
            &req.visibility,
            &req.tags,
            req.ingested_after.as_deref(),
        )?;

        let vector = self.embedder.embed(cancel, &query).await?;

        let collections = match req.collection.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => {
                if !self.vectors.collection_exists(cancel, name).await? {
                    return Err(Error::not_found(format!("collection '{}' not found", name)));
                }
                vec![name.to_string()]
            }
            None => self.vectors.list_collections(cancel).await?,
        };
        debug!(collections = collections.len(), limit, threshold, "Searching");

        let mut per_collection = Vec::with_capacity(collections.len());
        for collection in &collections {
            let hits = self
                .vectors
                .search(cancel, collection, &vector, limit, threshold, &filter)
                .await?;
            per_collection.push(hits);
        }

        let results = merge(per_collection, limit);
        info!(query = %query, results = results.len(), "Search complete");

        Ok(SearchResponse {
            count: results.len(),
            results,
            query,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}
