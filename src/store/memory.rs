//! In-process [`VectorStore`] for tests and local experiments.
//!
//! Collections live in a `HashMap` behind a `RwLock`; search is brute-force
//! cosine similarity. Points keep insertion order so samples are stable.

use super::{finalize_hits, Point, ScoredPoint, SearchFilter, VectorStore};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::similarity::cosine_similarity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

struct MemoryCollection {
    dimension: usize,
    points: Vec<Point>,
}

/// In-memory vector store
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .read()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .write()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }
}

fn missing(collection: &str) -> Error {
    Error::not_found(format!("collection '{}' not found", collection))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        _cancel: &CancellationToken,
        name: &str,
        vector_size: usize,
    ) -> Result<()> {
        let mut collections = self.write()?;
        match collections.get(name) {
            Some(existing) if existing.dimension != vector_size => Err(Error::Schema(format!(
                "Collection '{}' has vector size {}, but {} was requested",
                name, existing.dimension, vector_size
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    MemoryCollection {
                        dimension: vector_size,
                        points: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn collection_exists(&self, _cancel: &CancellationToken, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn upsert_point(
        &self,
        _cancel: &CancellationToken,
        collection: &str,
        point: Point,
    ) -> Result<()> {
        let mut collections = self.write()?;
        let target = collections.get_mut(collection).ok_or_else(|| missing(collection))?;

        if point.vector.len() != target.dimension {
            return Err(Error::Schema(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {}",
                collection,
                target.dimension,
                point.vector.len()
            )));
        }

        match target.points.iter_mut().find(|p| p.id == point.id) {
            Some(existing) => *existing = point,
            None => target.points.push(point),
        }
        Ok(())
    }

    async fn delete_point(
        &self,
        _cancel: &CancellationToken,
        collection: &str,
        id: &str,
    ) -> Result<()> {
        if let Some(target) = self.write()?.get_mut(collection) {
            target.points.retain(|p| p.id != id);
        }
        Ok(())
    }

    async fn search(
        &self,
        _cancel: &CancellationToken,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.read()?;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let hits = target
            .points
            .iter()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector) as f32,
                payload: p.payload.clone(),
            })
            .collect();

        Ok(finalize_hits(hits, threshold, limit))
    }

    async fn list_collections(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn count_points(&self, _cancel: &CancellationToken, collection: &str) -> Result<usize> {
        let collections = self.read()?;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(target.points.len())
    }

    async fn sample_points(
        &self,
        _cancel: &CancellationToken,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Point>> {
        let collections = self.read()?;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(target.points.iter().take(limit).cloned().collect())
    }

    async fn get_points(
        &self,
        _cancel: &CancellationToken,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<Point>> {
        let collections = self.read()?;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(ids
            .iter()
            .filter_map(|id| target.points.iter().find(|p| &p.id == id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{RecordPayload, Visibility};

    fn point(id: &str, vector: Vec<f32>, visibility: Visibility) -> Point {
        Point {
            id: id.to_string(),
            vector,
            payload: RecordPayload {
                namespace: Some("ns".to_string()),
                visibility: Some(visibility),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent_and_checks_size() {
        let store = InMemoryVectorStore::new();
        let cancel = CancellationToken::new();
        store.ensure_collection(&cancel, "c", 3).await.unwrap();
        store.ensure_collection(&cancel, "c", 3).await.unwrap();
        let err = store.ensure_collection(&cancel, "c", 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_is_idempotent() {
        let store = InMemoryVectorStore::new();
        let cancel = CancellationToken::new();
        store.ensure_collection(&cancel, "c", 2).await.unwrap();
        store
            .upsert_point(&cancel, "c", point("p1", vec![1.0, 0.0], Visibility::Shared))
            .await
            .unwrap();
        store
            .upsert_point(&cancel, "c", point("p1", vec![0.0, 1.0], Visibility::Shared))
            .await
            .unwrap();
        assert_eq!(store.count_points(&cancel, "c").await.unwrap(), 1);

        let fetched = store
            .get_points(&cancel, "c", &["p1".to_string(), "absent".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].vector, vec![0.0, 1.0]);

        store.delete_point(&cancel, "c", "p1").await.unwrap();
        store.delete_point(&cancel, "c", "p1").await.unwrap();
        assert_eq!(store.count_points(&cancel, "c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new();
        let cancel = CancellationToken::new();
        store.ensure_collection(&cancel, "c", 3).await.unwrap();
        let err = store
            .upsert_point(&cancel, "c", point("p1", vec![1.0, 0.0], Visibility::Shared))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[tokio::test]
    async fn test_search_respects_threshold_and_filter() {
        let store = InMemoryVectorStore::new();
        let cancel = CancellationToken::new();
        store.ensure_collection(&cancel, "c", 2).await.unwrap();
        for (id, vector, vis) in [
            ("a", vec![1.0, 0.0], Visibility::Shared),
            ("b", vec![0.8, 0.6], Visibility::Private),
            ("c", vec![0.0, 1.0], Visibility::Shared),
        ] {
            store
                .upsert_point(&cancel, "c", point(id, vector, vis))
                .await
                .unwrap();
        }

        let hits = store
            .search(&cancel, "c", &[1.0, 0.0], 10, 0.5, &SearchFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits.iter().all(|h| h.score >= 0.5));

        let filter = SearchFilter {
            visibility: vec![Visibility::Shared],
            ..Default::default()
        };
        let hits = store
            .search(&cancel, "c", &[1.0, 0.0], 10, 0.0, &filter)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let store = InMemoryVectorStore::new();
        let cancel = CancellationToken::new();
        let err = store.count_points(&cancel, "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.list_collections(&cancel).await.unwrap().is_empty());
    }
}
