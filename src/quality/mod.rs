//! Collection quality metrics
//!
//! Scores sampled vectors for coherence, freshness, redundancy and coverage,
//! then folds the per-collection numbers into one health score.

use crate::cancel::CancellationToken;
use crate::config::QualityConfig;
use crate::error::{Error, Result};
use crate::models::{CollectionQuality, HealthStatus, QualityReport};
use crate::similarity::{cosine_similarity, windowed_pairs};
use crate::store::{Point, VectorStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Mean pairwise cosine remapped to `[0, 1]`
pub fn coherence(vectors: &[&[f32]], window: usize) -> f64 {
    if vectors.len() < 2 {
        return 1.0;
    }

    let (sum, pairs) = windowed_pairs(vectors.len(), window).fold((0.0, 0usize), |(sum, n), (i, j)| {
        (sum + (cosine_similarity(vectors[i], vectors[j]) + 1.0) / 2.0, n + 1)
    });

    if pairs == 0 {
        return 0.5;
    }
    (sum / pairs as f64).clamp(0.0, 1.0)
}

/// Fraction of pairs that are near duplicates
pub fn redundancy(vectors: &[&[f32]], window: usize, threshold: f64) -> f64 {
    if vectors.len() < 2 {
        return 0.0;
    }

    let (duplicates, pairs) =
        windowed_pairs(vectors.len(), window).fold((0usize, 0usize), |(dup, n), (i, j)| {
            let similar = cosine_similarity(vectors[i], vectors[j]) > threshold;
            (dup + similar as usize, n + 1)
        });

    if pairs == 0 {
        return 0.0;
    }
    duplicates as f64 / pairs as f64
}

/// Mean exponential decay of record age
pub fn freshness(timestamps_ms: &[i64], now_ms: i64, half_life_days: f64) -> f64 {
    if timestamps_ms.is_empty() || half_life_days <= 0.0 {
        return 0.0;
    }

    let half_life_ms = half_life_days * MS_PER_DAY;
    let total: f64 = timestamps_ms
        .iter()
        .map(|ts| {
            let age = (now_ms - ts).max(0) as f64;
            (-age * std::f64::consts::LN_2 / half_life_ms).exp()
        })
        .sum();

    (total / timestamps_ms.len() as f64).clamp(0.0, 1.0)
}

/// `(coherence + freshness + coverage - redundancy) / 3`, clamped to `[0, 1]`
pub fn health_score(coherence: f64, freshness: f64, coverage: f64, redundancy: f64) -> f64 {
    ((coherence + freshness + coverage - redundancy) / 3.0).clamp(0.0, 1.0)
}

/// Quality service handle
#[derive(Clone)]
pub struct QualityService {
    vectors: Arc<dyn VectorStore>,
    config: QualityConfig,
}

impl QualityService {
    pub fn new(vectors: Arc<dyn VectorStore>, config: QualityConfig) -> Self {
        Self { vectors, config }
    }

    /// Metrics over a sample of points
    pub fn score_sample(&self, name: &str, points_count: usize, sample: &[Point]) -> CollectionQuality {
        let vectors: Vec<&[f32]> = sample
            .iter()
            .map(|p| p.vector.as_slice())
            .filter(|v| !v.is_empty())
            .collect();
        let timestamps: Vec<i64> = sample
            .iter()
            .filter_map(|p| p.payload.ingested_at_ms)
            .collect();
        let window = self.config.pair_window;

        CollectionQuality {
            name: name.to_string(),
            points_count,
            sampled: sample.len(),
            coherence: coherence(&vectors, window),
            freshness: freshness(
                &timestamps,
                Utc::now().timestamp_millis(),
                self.config.freshness_half_life_days,
            ),
            redundancy: redundancy(&vectors, window, self.config.redundancy_threshold),
            coverage: self.config.coverage,
        }
    }

    async fn collection_quality(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<CollectionQuality> {
        let count = self.vectors.count_points(cancel, name).await?;
        let sample_size = count.min(self.config.max_sample);
        let sample = if sample_size == 0 {
            Vec::new()
        } else {
            self.vectors.sample_points(cancel, name, sample_size).await?
        };

        let quality = self.score_sample(name, count, &sample);
        debug!(
            collection = name,
            sampled = quality.sampled,
            coherence = quality.coherence,
            freshness = quality.freshness,
            redundancy = quality.redundancy,
            "Collection scored"
        );
        Ok(quality)
    }

    /// Score every collection, or only `collection` when given
    pub async fn report(
        &self,
        cancel: &CancellationToken,
        collection: Option<&str>,
    ) -> Result<QualityReport> {
        let started = Instant::now();

        let names = match collection.map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => {
                if !self.vectors.collection_exists(cancel, name).await? {
                    return Err(Error::not_found(format!("collection '{}' not found", name)));
                }
                vec![name.to_string()]
            }
            None => self.vectors.list_collections(cancel).await?,
        };

        let mut collections = Vec::with_capacity(names.len());
        for name in &names {
            collections.push(self.collection_quality(cancel, name).await?);
        }

        let mean = |f: fn(&CollectionQuality) -> f64, empty: f64| {
            if collections.is_empty() {
                empty
            } else {
                collections.iter().map(f).sum::<f64>() / collections.len() as f64
            }
        };

        // With nothing to sample, report the metrics of an empty sample.
        let coherence = mean(|c| c.coherence, 1.0);
        let freshness = mean(|c| c.freshness, 0.0);
        let redundancy = mean(|c| c.redundancy, 0.0);
        let coverage = mean(|c| c.coverage, self.config.coverage);

        let score = health_score(coherence, freshness, coverage, redundancy);
        let status = HealthStatus::from_score(score);
        info!(collections = collections.len(), score, ?status, "Quality report computed");

        Ok(QualityReport {
            score,
            status,
            coherence,
            freshness,
            redundancy,
            coverage,
            collections,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryVectorStore, RecordPayload};

    fn within_unit(x: f64) -> bool {
        (0.0..=1.0).contains(&x)
    }

    #[test]
    fn test_coherence_edges() {
        let x: &[f32] = &[1.0, 0.0];
        let y: &[f32] = &[0.0, 1.0];
        let x2: &[f32] = &[2.0, 0.0];
        let neg: &[f32] = &[-1.0, 0.0];

        assert_eq!(coherence(&[], 100), 1.0);
        assert_eq!(coherence(&[x], 100), 1.0);
        assert_eq!(coherence(&[x, y], 0), 0.5);

        let same = coherence(&[x, x2], 100);
        assert!((same - 1.0).abs() < 1e-9);
        let opposite = coherence(&[x, neg], 100);
        assert!(opposite.abs() < 1e-9);
    }

    #[test]
    fn test_redundancy_counts_near_duplicates() {
        let a: &[f32] = &[1.0, 0.0];
        let b: &[f32] = &[1.0, 0.01];
        let c: &[f32] = &[0.0, 1.0];
        assert_eq!(redundancy(&[a], 100, 0.95), 0.0);
        let r = redundancy(&[a, b, c], 100, 0.95);
        assert!((r - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_half_life() {
        let now = 1_700_000_000_000i64;
        assert_eq!(freshness(&[], now, 30.0), 0.0);
        assert!((freshness(&[now], now, 30.0) - 1.0).abs() < 1e-9);

        let month_ago = now - (30.0 * MS_PER_DAY) as i64;
        assert!((freshness(&[month_ago], now, 30.0) - 0.5).abs() < 1e-9);
        // Future timestamps count as brand new.
        assert!((freshness(&[now + 1000], now, 30.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_stay_in_unit_interval() {
        let vectors: Vec<Vec<f32>> = (0..50)
            .map(|i| (0..6).map(|d| ((i * 13 + d * 7) % 9) as f32 - 4.0).collect())
            .collect();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        assert!(within_unit(coherence(&refs, 100)));
        assert!(within_unit(redundancy(&refs, 100, 0.95)));
        assert!(within_unit(health_score(1.0, 1.0, 1.0, 0.0)));
        assert!(within_unit(health_score(0.0, 0.0, 0.0, 1.0)));
    }

    #[tokio::test]
    async fn test_report_without_collections() {
        let service = QualityService::new(
            Arc::new(InMemoryVectorStore::new()),
            QualityConfig::default(),
        );
        let report = service.report(&CancellationToken::new(), None).await.unwrap();
        assert!(report.collections.is_empty());
        assert_eq!(report.coherence, 1.0);
        assert_eq!(report.freshness, 0.0);
        assert_eq!(report.coverage, 0.70);
        assert!((report.score - (1.0 + 0.0 + 0.70) / 3.0).abs() < 1e-9);
        assert_eq!(report.status, HealthStatus::Fair);
    }

    #[tokio::test]
    async fn test_report_for_one_collection() {
        let store = Arc::new(InMemoryVectorStore::new());
        let cancel = CancellationToken::new();
        store.ensure_collection(&cancel, "c", 2).await.unwrap();
        let now = Utc::now().timestamp_millis();
        for (i, v) in [[1.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]].iter().enumerate() {
            store
                .upsert_point(
                    &cancel,
                    "c",
                    Point {
                        id: format!("p{}", i),
                        vector: v.to_vec(),
                        payload: RecordPayload {
                            ingested_at_ms: Some(now),
                            ..Default::default()
                        },
                    },
                )
                .await
                .unwrap();
        }
        store.ensure_collection(&cancel, "other", 2).await.unwrap();

        let service = QualityService::new(store, QualityConfig::default());
        let report = service.report(&cancel, Some("c")).await.unwrap();
        assert_eq!(report.collections.len(), 1);

        let c = &report.collections[0];
        assert_eq!((c.points_count, c.sampled), (3, 3));
        assert!((c.redundancy - 1.0 / 3.0).abs() < 1e-9);
        // Pairs: identical (1.0), orthogonal (0.5) twice.
        assert!((c.coherence - 2.0 / 3.0).abs() < 1e-9);
        assert!(c.freshness > 0.99);

        let err = service.report(&cancel, Some("nope")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
