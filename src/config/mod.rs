//! Configuration management for the knowledge observatory
//!
//! Connection settings come from the environment (`API_PORT`, `DATABASE_URL`
//! or the `POSTGRES_*` family, `QDRANT_*`, `OLLAMA_*`). Tuning knobs live in an
//! optional TOML file whose sections all have defaults.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub api_port: u16,

    /// Metadata store connection URL (`postgres://…` or `sqlite:…`)
    pub database_url: String,

    /// Qdrant REST URL, or `memory` for the in-process store
    pub qdrant_url: String,

    /// Qdrant API key, sent as the `api-key` header
    pub qdrant_api_key: Option<String>,

    /// Ollama base URL
    pub ollama_url: String,

    /// Ollama embedding model name
    pub embedding_model: String,

    pub tuning: Tuning,
}

/// Tuning sections loaded from the optional TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tuning {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Ingestion and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Collection used when a request names none
    #[serde(default = "default_collection_name")]
    pub default_collection: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    #[serde(default = "default_max_chunk_overlap")]
    pub max_chunk_overlap: usize,

    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_search_max_limit")]
    pub max_limit: usize,

    /// Minimum similarity score (0.0 - 1.0)
    #[serde(default = "default_search_threshold")]
    pub default_threshold: f32,
}

/// Concept-graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_depth")]
    pub default_depth: u32,

    #[serde(default = "default_graph_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_graph_limit")]
    pub default_limit: usize,

    #[serde(default = "default_graph_threshold")]
    pub default_threshold: f32,

    #[serde(default = "default_graph_label_chars")]
    pub label_chars: usize,

    #[serde(default = "default_pair_window")]
    pub pair_window: usize,
}

/// Quality metric configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_max_sample")]
    pub max_sample: usize,

    #[serde(default = "default_quality_coverage")]
    pub coverage: f64,

    #[serde(default = "default_freshness_half_life_days")]
    pub freshness_half_life_days: f64,

    #[serde(default = "default_redundancy_threshold")]
    pub redundancy_threshold: f64,

    #[serde(default = "default_pair_window")]
    pub pair_window: usize,
}

/// Ingestion worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    #[serde(default = "default_worker_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    #[serde(default = "default_worker_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

/// Per-collaborator call budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_embedder_timeout_secs")]
    pub embedder_secs: u64,

    #[serde(default = "default_vector_store_timeout_secs")]
    pub vector_store_secs: u64,

    #[serde(default = "default_database_timeout_secs")]
    pub database_secs: u64,

    #[serde(default = "default_handler_timeout_secs")]
    pub handler_secs: u64,
}

impl TimeoutConfig {
    pub fn embedder(&self) -> Duration {
        Duration::from_secs(self.embedder_secs)
    }

    pub fn vector_store(&self) -> Duration {
        Duration::from_secs(self.vector_store_secs)
    }

    pub fn database(&self) -> Duration {
        Duration::from_secs(self.database_secs)
    }

    pub fn handler(&self) -> Duration {
        Duration::from_secs(self.handler_secs)
    }
}

/// Database pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_db_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_collection: default_collection_name(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunk_size: default_max_chunk_size(),
            max_chunk_overlap: default_max_chunk_overlap(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_search_max_limit(),
            default_threshold: default_search_threshold(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_depth: default_graph_depth(),
            max_depth: default_graph_max_depth(),
            default_limit: default_graph_limit(),
            default_threshold: default_graph_threshold(),
            label_chars: default_graph_label_chars(),
            pair_window: default_pair_window(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_sample: default_quality_max_sample(),
            coverage: default_quality_coverage(),
            freshness_half_life_days: default_freshness_half_life_days(),
            redundancy_threshold: default_redundancy_threshold(),
            pair_window: default_pair_window(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_backoff_ms: default_worker_idle_backoff_ms(),
            error_backoff_ms: default_worker_error_backoff_ms(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedder_secs: default_embedder_timeout_secs(),
            vector_store_secs: default_vector_store_timeout_secs(),
            database_secs: default_database_timeout_secs(),
            handler_secs: default_handler_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_db_max_connections(),
            min_connections: default_db_min_connections(),
            max_lifetime_secs: default_db_max_lifetime_secs(),
        }
    }
}

impl Tuning {
    /// Load tuning sections from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading tuning from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let tuning: Tuning = toml::from_str(&content)?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Validate the tuning values
    pub fn validate(&self) -> Result<()> {
        if self.ingest.chunk_size == 0 || self.ingest.chunk_size > self.ingest.max_chunk_size {
            return Err(Error::Config(format!(
                "ingest.chunk_size must be between 1 and {}",
                self.ingest.max_chunk_size
            )));
        }

        if self.ingest.max_chunks_per_doc == 0 {
            return Err(Error::Config(
                "ingest.max_chunks_per_doc must be greater than 0".to_string(),
            ));
        }

        if self.search.max_limit == 0 {
            return Err(Error::Config(
                "search.max_limit must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.quality.coverage) {
            return Err(Error::Config(
                "quality.coverage must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.quality.freshness_half_life_days <= 0.0 {
            return Err(Error::Config(
                "quality.freshness_half_life_days must be positive".to_string(),
            ));
        }

        if self.worker.count == 0 {
            return Err(Error::Config(
                "worker.count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Resolve configuration from the process environment and optional tuning file
    pub fn from_env(tuning_path: Option<&Path>) -> Result<Self> {
        let tuning = match tuning_path {
            Some(path) => Tuning::load(path)?,
            None => Tuning::default(),
        };
        Self::from_lookup(|key| std::env::var(key).ok(), tuning)
    }

    /// Resolve configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F, tuning: Tuning) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_port = get("API_PORT")
            .ok_or_else(|| Error::Config("API_PORT is required".to_string()))?
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("API_PORT is not a valid port: {}", e)))?;

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => postgres_url_from_parts(&get)?,
        };

        let config = Self {
            api_port,
            database_url,
            qdrant_url: get("QDRANT_URL").unwrap_or_else(default_qdrant_url),
            qdrant_api_key: get("QDRANT_API_KEY"),
            ollama_url: get("OLLAMA_URL").unwrap_or_else(default_ollama_url),
            embedding_model: get("OLLAMA_EMBEDDING_MODEL").unwrap_or_else(default_embedding_model),
            tuning,
        };

        info!(
            port = config.api_port,
            qdrant = %config.qdrant_url,
            ollama = %config.ollama_url,
            model = %config.embedding_model,
            "Configuration resolved"
        );

        Ok(config)
    }
}

fn postgres_url_from_parts<G>(get: &G) -> Result<String>
where
    G: Fn(&str) -> Option<String>,
{
    const PARTS: [&str; 5] = [
        "POSTGRES_HOST",
        "POSTGRES_PORT",
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_DB",
    ];

    let missing: Vec<&str> = PARTS.iter().copied().filter(|k| get(k).is_none()).collect();
    if !missing.is_empty() {
        return Err(Error::Config(format!(
            "DATABASE_URL is not set and {} missing",
            missing.join(", ")
        )));
    }

    let part = |key: &str| get(key).unwrap_or_default();
    let invalid = |what: &str| Error::Config(format!("POSTGRES_{} is not usable in a URL", what));

    let port = part("POSTGRES_PORT")
        .parse::<u16>()
        .map_err(|e| Error::Config(format!("POSTGRES_PORT is not a valid port: {}", e)))?;

    // Credentials and the database name go through the URL setters so that
    // reserved characters are percent-encoded.
    let mut url = Url::parse("postgres://localhost")?;
    url.set_host(Some(&part("POSTGRES_HOST")))
        .map_err(|_| invalid("HOST"))?;
    url.set_port(Some(port)).map_err(|_| invalid("PORT"))?;
    url.set_username(&part("POSTGRES_USER"))
        .map_err(|_| invalid("USER"))?;
    url.set_password(Some(&part("POSTGRES_PASSWORD")))
        .map_err(|_| invalid("PASSWORD"))?;
    url.set_path("/");
    url.path_segments_mut()
        .map_err(|_| invalid("DB"))?
        .pop_if_empty()
        .push(&part("POSTGRES_DB"));
    url.set_query(Some("sslmode=disable"));

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_tuning() {
        let tuning = Tuning::default();
        assert_eq!(tuning.ingest.default_collection, "knowledge_chunks_v1");
        assert_eq!(tuning.ingest.chunk_size, 1200);
        assert_eq!(tuning.ingest.chunk_overlap, 150);
        assert_eq!(tuning.search.default_limit, 10);
        assert_eq!(tuning.quality.max_sample, 500);
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn test_env_with_database_url() {
        let config = Config::from_lookup(
            lookup(&[
                ("API_PORT", "8080"),
                ("DATABASE_URL", "postgres://u:p@db:5432/ko"),
                ("QDRANT_API_KEY", "secret"),
            ]),
            Tuning::default(),
        )
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.database_url, "postgres://u:p@db:5432/ko");
        assert_eq!(config.qdrant_url, "http://localhost:6333");
        assert_eq!(config.qdrant_api_key.as_deref(), Some("secret"));
        assert_eq!(config.embedding_model, "nomic-embed-text");
    }

    #[test]
    fn test_env_with_postgres_parts() {
        let config = Config::from_lookup(
            lookup(&[
                ("API_PORT", "9000"),
                ("POSTGRES_HOST", "db"),
                ("POSTGRES_PORT", "5432"),
                ("POSTGRES_USER", "ko"),
                ("POSTGRES_PASSWORD", "pw"),
                ("POSTGRES_DB", "observatory"),
            ]),
            Tuning::default(),
        )
        .unwrap();

        assert_eq!(
            config.database_url,
            "postgres://ko:pw@db:5432/observatory?sslmode=disable"
        );
    }

    #[test]
    fn test_postgres_parts_are_percent_encoded() {
        let config = Config::from_lookup(
            lookup(&[
                ("API_PORT", "9000"),
                ("POSTGRES_HOST", "db"),
                ("POSTGRES_PORT", "5432"),
                ("POSTGRES_USER", "ko"),
                ("POSTGRES_PASSWORD", "p@ss/w#rd:1"),
                ("POSTGRES_DB", "observatory"),
            ]),
            Tuning::default(),
        )
        .unwrap();

        let url = Url::parse(&config.database_url).unwrap();
        assert_eq!(url.host_str(), Some("db"));
        assert_eq!(url.port(), Some(5432));
        assert_eq!(url.username(), "ko");
        assert_eq!(url.password(), Some("p%40ss%2Fw%23rd%3A1"));
        assert_eq!(url.path(), "/observatory");
        assert_eq!(url.query(), Some("sslmode=disable"));
    }

    #[test]
    fn test_postgres_port_must_be_numeric() {
        let err = Config::from_lookup(
            lookup(&[
                ("API_PORT", "9000"),
                ("POSTGRES_HOST", "db"),
                ("POSTGRES_PORT", "five"),
                ("POSTGRES_USER", "ko"),
                ("POSTGRES_PASSWORD", "pw"),
                ("POSTGRES_DB", "observatory"),
            ]),
            Tuning::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("POSTGRES_PORT")));
    }

    #[test]
    fn test_missing_port_is_fatal() {
        let err = Config::from_lookup(
            lookup(&[("DATABASE_URL", "sqlite::memory:")]),
            Tuning::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("API_PORT")));
    }

    #[test]
    fn test_missing_database_is_fatal() {
        let err = Config::from_lookup(
            lookup(&[("API_PORT", "8080"), ("POSTGRES_HOST", "db")]),
            Tuning::default(),
        )
        .unwrap_err();
        match err {
            Error::Config(msg) => {
                assert!(msg.contains("POSTGRES_PORT"));
                assert!(!msg.contains("POSTGRES_HOST"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_tuning_from_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("observatory.toml");
        std::fs::write(
            &path,
            "[worker]\ncount = 4\n\n[quality]\ncoverage = 0.5\n",
        )
        .unwrap();

        let tuning = Tuning::load(&path).unwrap();
        assert_eq!(tuning.worker.count, 4);
        assert_eq!(tuning.quality.coverage, 0.5);
        assert_eq!(tuning.search.max_limit, 100);
    }

    #[test]
    fn test_tuning_rejects_bad_coverage() {
        let mut tuning = Tuning::default();
        tuning.quality.coverage = 1.5;
        assert!(tuning.validate().is_err());
    }
}
