//! Default values for configuration

/// Default Qdrant REST URL for local development
pub fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

/// Default Ollama URL for local development
pub fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Default embedding model served by Ollama
pub fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

/// Default collection for knowledge records
pub fn default_collection_name() -> String {
    "knowledge_chunks_v1".to_string()
}

/// Default characters per chunk
pub fn default_chunk_size() -> usize {
    1200
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    150
}

/// Hard ceiling on chunk size
pub fn default_max_chunk_size() -> usize {
    8000
}

/// Hard ceiling on chunk overlap
pub fn default_max_chunk_overlap() -> usize {
    2000
}

/// Maximum chunks produced from one document
pub fn default_max_chunks_per_doc() -> usize {
    5000
}

/// Default number of search results
pub fn default_search_limit() -> usize {
    10
}

/// Maximum search results allowed
pub fn default_search_max_limit() -> usize {
    100
}

/// Default minimum similarity score for search
pub fn default_search_threshold() -> f32 {
    0.3
}

/// Default graph expansion depth
pub fn default_graph_depth() -> u32 {
    1
}

/// Deepest graph expansion accepted
pub fn default_graph_max_depth() -> u32 {
    3
}

/// Default number of graph neighbours
pub fn default_graph_limit() -> usize {
    25
}

/// Default minimum edge weight for graph expansion
pub fn default_graph_threshold() -> f32 {
    0.5
}

/// Characters kept in a graph node label
pub fn default_graph_label_chars() -> usize {
    120
}

/// Subsequent indices paired with each vector in pairwise routines
pub fn default_pair_window() -> usize {
    100
}

/// Maximum points sampled per collection for quality metrics
pub fn default_quality_max_sample() -> usize {
    500
}

/// Constant coverage score
pub fn default_quality_coverage() -> f64 {
    0.70
}

/// Freshness half-life in days
pub fn default_freshness_half_life_days() -> f64 {
    30.0
}

/// Cosine similarity above which a pair counts as redundant
pub fn default_redundancy_threshold() -> f64 {
    0.95
}

/// Number of ingestion workers
pub fn default_worker_count() -> usize {
    2
}

/// Sleep when no job is pending (milliseconds)
pub fn default_worker_idle_backoff_ms() -> u64 {
    500
}

/// Sleep after a failed claim (milliseconds)
pub fn default_worker_error_backoff_ms() -> u64 {
    1000
}

/// Embedder per-call budget (seconds)
pub fn default_embedder_timeout_secs() -> u64 {
    30
}

/// Vector store per-call budget (seconds)
pub fn default_vector_store_timeout_secs() -> u64 {
    15
}

/// Metadata store per-call budget (seconds)
pub fn default_database_timeout_secs() -> u64 {
    10
}

/// Total budget for one HTTP request (seconds)
pub fn default_handler_timeout_secs() -> u64 {
    60
}

/// Maximum pooled database connections
pub fn default_db_max_connections() -> u32 {
    25
}

/// Minimum idle database connections
pub fn default_db_min_connections() -> u32 {
    5
}

/// Pooled connection lifetime (seconds)
pub fn default_db_max_lifetime_secs() -> u64 {
    300
}
