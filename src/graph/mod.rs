//! Concept graph around a center phrase
//!
//! Nodes are the nearest records to the embedded center concept; each is
//! linked to the virtual `center` node by its score. At depth 2 and above,
//! records are also linked to each other when their vectors are similar
//! enough. The caller's threshold only gates those pairwise edges; the
//! center search keeps every record scoring at least zero.

use crate::cancel::CancellationToken;
use crate::config::GraphConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::models::{GraphEdge, GraphNode, GraphRequest, GraphResponse};
use crate::search::{bounded_limit, bounded_threshold, build_filter};
use crate::similarity::{cosine_similarity, windowed_pairs};
use crate::store::{ScoredPoint, VectorStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Id of the virtual center node
pub const CENTER_ID: &str = "center";

/// Upper bound on nodes per graph
const MAX_NODES: usize = 100;

/// Lowest center score a record may have and still become a node
const CENTER_SCORE_FLOOR: f32 = 0.0;

/// Node id for a record, kept apart from the virtual center
fn node_id_for(record_id: String) -> String {
    if record_id == CENTER_ID {
        format!("record:{}", record_id)
    } else {
        record_id
    }
}

/// Shorten text to `max_chars` characters, marking the cut
pub fn truncate_label(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut label: String = text.chars().take(max_chars).collect();
    label.push('…');
    label
}

/// Edge set keyed by unordered endpoint pair, keeping the heaviest edge
#[derive(Default)]
struct EdgeSet {
    edges: Vec<GraphEdge>,
    index: HashMap<(String, String), usize>,
}

impl EdgeSet {
    fn add(&mut self, source: &str, target: &str, weight: f32) {
        if source == target {
            return;
        }
        let key = if source <= target {
            (source.to_string(), target.to_string())
        } else {
            (target.to_string(), source.to_string())
        };

        match self.index.get(&key) {
            Some(&i) => {
                if weight > self.edges[i].weight {
                    self.edges[i].weight = weight;
                }
            }
            None => {
                self.index.insert(key, self.edges.len());
                self.edges.push(GraphEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    weight,
                });
            }
        }
    }

    fn into_edges(self) -> Vec<GraphEdge> {
        self.edges
    }
}

/// Graph service handle
#[derive(Clone)]
pub struct GraphService {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    config: GraphConfig,
    default_collection: String,
}

impl GraphService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        config: GraphConfig,
        default_collection: String,
    ) -> Self {
        Self {
            embedder,
            vectors,
            config,
            default_collection,
        }
    }

    pub async fn graph(
        &self,
        cancel: &CancellationToken,
        req: &GraphRequest,
    ) -> Result<GraphResponse> {
        let started = Instant::now();

        let center = req
            .center_concept
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::validation("center_concept is required"))?
            .to_string();
        let depth = req
            .depth
            .map(|d| d.clamp(1, self.config.max_depth.max(1) as i64) as u32)
            .unwrap_or(self.config.default_depth);
        let limit = bounded_limit(req.limit, self.config.default_limit, MAX_NODES);
        let threshold = bounded_threshold(req.threshold, self.config.default_threshold);
        let filter = build_filter(&req.namespaces, &req.visibility, &req.tags, None)?;
        let collection = req
            .collection
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_collection)
            .to_string();

        let vector = self.embedder.embed(cancel, &center).await?;
        if !self.vectors.collection_exists(cancel, &collection).await? {
            return Err(Error::not_found(format!(
                "collection '{}' not found",
                collection
            )));
        }

        let hits = self
            .vectors
            .search(cancel, &collection, &vector, limit, CENTER_SCORE_FLOOR, &filter)
            .await?;

        // Node ids are caller-facing record ids; keep the point id for lookups.
        let mut seen = HashSet::new();
        let mut kept: Vec<(String, ScoredPoint)> = Vec::with_capacity(hits.len());
        for hit in hits {
            let node_id = node_id_for(hit.payload.record_id.clone().unwrap_or_else(|| hit.id.clone()));
            if seen.insert(node_id.clone()) {
                kept.push((node_id, hit));
            }
        }

        let nodes: Vec<GraphNode> = kept
            .iter()
            .map(|(id, hit)| GraphNode {
                id: id.clone(),
                label: truncate_label(hit.payload.text(), self.config.label_chars),
                namespace: hit.payload.namespace.clone(),
                score: hit.score,
            })
            .collect();

        let mut edges = EdgeSet::default();
        for node in &nodes {
            edges.add(CENTER_ID, &node.id, node.score);
        }

        if depth >= 2 && kept.len() >= 2 {
            let point_ids: Vec<String> = kept.iter().map(|(_, hit)| hit.id.clone()).collect();
            let vectors: HashMap<String, Vec<f32>> = self
                .vectors
                .get_points(cancel, &collection, &point_ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p.vector))
                .collect();

            for (i, j) in windowed_pairs(kept.len(), self.config.pair_window) {
                let (a_id, a) = &kept[i];
                let (b_id, b) = &kept[j];
                let (Some(va), Some(vb)) = (vectors.get(&a.id), vectors.get(&b.id)) else {
                    continue;
                };
                let similarity = cosine_similarity(va, vb) as f32;
                if similarity >= threshold {
                    edges.add(a_id, b_id, similarity);
                }
            }
        }

        let edges = edges.into_edges();
        debug!(
            center = %center,
            depth,
            nodes = nodes.len(),
            edges = edges.len(),
            "Graph built"
        );

        Ok(GraphResponse {
            center,
            nodes,
            edges,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::UpsertRecordRequest;
    use crate::testing::{fixture, Fixture, StubEmbedder};

    async fn seeded() -> Fixture {
        let embedder = StubEmbedder::new(vec![0.0, 0.0, 1.0])
            .with("rust", vec![1.0, 0.0, 0.0])
            .with("cargo", vec![0.9, 0.1, 0.0])
            .with("crates", vec![0.8, 0.0, 0.6])
            .with("python", vec![0.0, 1.0, 0.0]);
        let fx = fixture(embedder).await;
        let cancel = CancellationToken::new();
        for content in ["cargo", "crates", "python"] {
            fx.ingest
                .upsert_record(
                    &cancel,
                    &UpsertRecordRequest {
                        namespace: Some("lang".into()),
                        record_id: Some(content.into()),
                        content: Some(content.into()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        fx
    }

    fn request(depth: i64) -> GraphRequest {
        GraphRequest {
            center_concept: Some("rust".into()),
            depth: Some(depth),
            ..Default::default()
        }
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("  short ", 10), "short");
        assert_eq!(truncate_label("abcdef", 3), "abc…");
    }

    #[test]
    fn test_edge_set_dedupes_unordered_pairs() {
        let mut edges = EdgeSet::default();
        edges.add("a", "b", 0.5);
        edges.add("b", "a", 0.7);
        edges.add("a", "a", 1.0);
        edges.add("a", "c", 0.6);
        let edges = edges.into_edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].weight, 0.7);
    }

    #[tokio::test]
    async fn test_depth_one_links_only_the_center() {
        let fx = seeded().await;
        let resp = fx
            .graph
            .graph(&CancellationToken::new(), &request(1))
            .await
            .unwrap();

        let ids: Vec<&str> = resp.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["cargo", "crates", "python"]);
        assert_eq!(resp.center, "rust");
        assert_eq!(resp.edges.len(), 3);
        assert!(resp.edges.iter().all(|e| e.source == CENTER_ID));
        assert_eq!(resp.nodes[0].namespace.as_deref(), Some("lang"));
    }

    #[tokio::test]
    async fn test_depth_two_adds_similarity_edges() {
        let fx = seeded().await;
        let resp = fx
            .graph
            .graph(&CancellationToken::new(), &request(2))
            .await
            .unwrap();

        assert_eq!(resp.nodes.len(), 3);
        assert_eq!(resp.edges.len(), 4);
        let pairs: Vec<_> = resp.edges.iter().filter(|e| e.source != CENTER_ID).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            (pairs[0].source.as_str(), pairs[0].target.as_str()),
            ("cargo", "crates")
        );
        assert!(pairs[0].weight >= 0.5);
    }

    #[tokio::test]
    async fn test_weak_match_stays_without_pairwise_edges() {
        let fx = seeded().await;
        let mut req = request(2);
        req.threshold = Some(0.9);
        let resp = fx.graph.graph(&CancellationToken::new(), &req).await.unwrap();

        // python scores 0 against the center, below the 0.9 threshold
        let python = resp.nodes.iter().find(|n| n.id == "python").unwrap();
        assert!(python.score < 0.9);
        assert!(resp
            .edges
            .iter()
            .any(|e| e.source == CENTER_ID && e.target == "python"));
        assert!(!resp
            .edges
            .iter()
            .any(|e| e.source != CENTER_ID && (e.source == "python" || e.target == "python")));
        // cargo and crates are about 0.79 apart, also under the threshold
        assert!(resp.edges.iter().all(|e| e.source == CENTER_ID));
    }

    #[tokio::test]
    async fn test_record_named_center_gets_its_own_node() {
        let fx = seeded().await;
        let cancel = CancellationToken::new();
        fx.ingest
            .upsert_record(
                &cancel,
                &UpsertRecordRequest {
                    namespace: Some("lang".into()),
                    record_id: Some(CENTER_ID.into()),
                    content: Some("cargo".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resp = fx.graph.graph(&cancel, &request(1)).await.unwrap();

        assert!(resp.nodes.iter().all(|n| n.id != CENTER_ID));
        assert!(resp.nodes.iter().any(|n| n.id == "record:center"));
        assert!(resp
            .edges
            .iter()
            .any(|e| e.source == CENTER_ID && e.target == "record:center"));
    }

    #[tokio::test]
    async fn test_graph_errors() {
        let fx = seeded().await;
        let cancel = CancellationToken::new();

        let err = fx
            .graph
            .graph(&cancel, &GraphRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut req = request(1);
        req.collection = Some("elsewhere".into());
        let err = fx.graph.graph(&cancel, &req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
