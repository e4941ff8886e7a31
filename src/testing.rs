//! Test doubles and fixtures

use crate::cancel::CancellationToken;
use crate::config::{Config, Tuning};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::graph::GraphService;
use crate::http::AppState;
use crate::ingest::IngestService;
use crate::jobs::JobService;
use crate::meta::{MetadataStore, SqliteMetaStore};
use crate::quality::QualityService;
use crate::search::SearchService;
use crate::store::{InMemoryVectorStore, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Embedder returning fixed vectors per text
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    default: Vec<f32>,
    vectors: HashMap<String, Vec<f32>>,
    fail_on: Option<String>,
    delay: Option<Duration>,
}

impl StubEmbedder {
    /// Every text embeds to `default` unless registered with [`Self::with`]
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            default,
            vectors: HashMap::new(),
            fail_on: None,
            delay: None,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Fail with an embedding error for any text containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Wait `delay` before every embed; cancellation ends the wait early
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(Error::Embedding(format!("stub refuses '{}'", needle)));
            }
        }
        Ok(self
            .vectors
            .get(text.trim())
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Services wired over an in-memory vector store and a throwaway SQLite file
pub struct Fixture {
    pub vectors: Arc<dyn VectorStore>,
    pub meta: Arc<dyn MetadataStore>,
    pub ingest: IngestService,
    pub search: SearchService,
    pub graph: GraphService,
    pub quality: QualityService,
    pub jobs: JobService,
    pub state: AppState,
    _tmp: TempDir,
}

pub fn test_config(database_url: &str) -> Config {
    Config {
        api_port: 0,
        database_url: database_url.to_string(),
        qdrant_url: "memory".to_string(),
        qdrant_api_key: None,
        ollama_url: "http://localhost:11434".to_string(),
        embedding_model: "stub".to_string(),
        tuning: Tuning::default(),
    }
}

pub async fn fixture(embedder: StubEmbedder) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let url = format!("sqlite://{}", tmp.path().join("meta.db").display());
    let config = test_config(&url);

    let store = SqliteMetaStore::connect(&url, &config.tuning).await.unwrap();
    store.init_schema().await.unwrap();
    let meta: Arc<dyn MetadataStore> = Arc::new(store);
    let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

    let state = AppState::build(
        &config,
        Arc::new(embedder),
        vectors.clone(),
        meta.clone(),
        CancellationToken::new(),
    );

    Fixture {
        vectors,
        meta,
        ingest: state.ingest.clone(),
        search: state.search.clone(),
        graph: state.graph.clone(),
        quality: state.quality.clone(),
        jobs: state.jobs.clone(),
        state,
        _tmp: tmp,
    }
}
