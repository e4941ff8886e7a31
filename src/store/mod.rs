//! Vector store integration
//!
//! This module defines the [`VectorStore`] contract and provides:
//! - Qdrant over its REST API ([`QdrantStore`])
//! - A brute-force in-process store ([`InMemoryVectorStore`])
//!
//! Collections are cosine-distance, single unnamed vector, dimension fixed at
//! creation. Point ids are UUID-shaped strings.

mod memory;
mod payload;
mod qdrant;

pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::cancel::CancellationToken;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// A point with its vector, ready to be upserted or returned by a sample
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

/// Search result
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: RecordPayload,
}

/// Payload constraints applied to a search.
///
/// Each non-empty field is a set-membership test; all provided constraints
/// must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub namespaces: Vec<String>,
    pub visibility: Vec<Visibility>,
    pub tags: Vec<String>,
    pub ingested_after_ms: Option<i64>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
            && self.visibility.is_empty()
            && self.tags.is_empty()
            && self.ingested_after_ms.is_none()
    }

    /// Evaluate the filter against a payload
    pub fn matches(&self, payload: &RecordPayload) -> bool {
        if !self.namespaces.is_empty() {
            match payload.namespace.as_deref() {
                Some(ns) if self.namespaces.iter().any(|n| n == ns) => {}
                _ => return false,
            }
        }

        if !self.visibility.is_empty() {
            match payload.visibility {
                Some(v) if self.visibility.contains(&v) => {}
                _ => return false,
            }
        }

        if !self.tags.is_empty() && !payload.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }

        if let Some(after) = self.ingested_after_ms {
            match payload.ingested_at_ms {
                Some(ts) if ts > after => {}
                _ => return false,
            }
        }

        true
    }

    /// Express the filter in Qdrant's JSON filter language
    pub fn to_qdrant_filter(&self) -> Option<Value> {
        let mut must: Vec<Value> = Vec::new();

        if !self.namespaces.is_empty() {
            must.push(json!({"key": "namespace", "match": {"any": self.namespaces}}));
        }

        if !self.visibility.is_empty() {
            let values: Vec<&str> = self.visibility.iter().map(Visibility::as_str).collect();
            must.push(json!({"key": "visibility", "match": {"any": values}}));
        }

        if !self.tags.is_empty() {
            must.push(json!({"key": "tags", "match": {"any": self.tags}}));
        }

        if let Some(after) = self.ingested_after_ms {
            must.push(json!({"key": "ingested_at_ms", "range": {"gt": after}}));
        }

        if must.is_empty() {
            return None;
        }

        Some(json!({ "must": must }))
    }
}

/// Vector store contract used by the ingest, search, graph and quality services
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing; fail with a schema error if it
    /// exists with a different vector size.
    async fn ensure_collection(
        &self,
        cancel: &CancellationToken,
        name: &str,
        vector_size: usize,
    ) -> Result<()>;

    async fn collection_exists(&self, cancel: &CancellationToken, name: &str) -> Result<bool>;

    /// Replace-or-insert one point
    async fn upsert_point(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        point: Point,
    ) -> Result<()>;

    /// Delete one point; deleting an absent id succeeds
    async fn delete_point(&self, cancel: &CancellationToken, collection: &str, id: &str)
        -> Result<()>;

    /// Up to `limit` hits with `score >= threshold`, best first
    async fn search(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>>;

    async fn list_collections(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    async fn count_points(&self, cancel: &CancellationToken, collection: &str) -> Result<usize>;

    /// Up to `limit` points with vectors, in store order
    async fn sample_points(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Point>>;

    /// Fetch specific points with vectors; absent ids are skipped
    async fn get_points(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<Point>>;
}

/// Sort hits best-first, ties by id, and drop anything under the threshold
pub(crate) fn finalize_hits(mut hits: Vec<ScoredPoint>, threshold: f32, limit: usize) -> Vec<ScoredPoint> {
    hits.retain(|h| h.score >= threshold);
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}
