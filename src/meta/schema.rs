//! Metadata schema definitions

/// Postgres schema
pub const POSTGRES_SCHEMA_SQL: &str = r#"
-- Knowledge metadata: one row per live record
CREATE TABLE IF NOT EXISTS knowledge_metadata (
    record_id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    source_scenario TEXT,
    source_type TEXT,
    updated_at TIMESTAMPTZ NOT NULL
);

-- Ingest history: append-only
CREATE TABLE IF NOT EXISTS ingest_history (
    id BIGSERIAL PRIMARY KEY,
    record_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    source_scenario TEXT,
    source_type TEXT,
    created_at TIMESTAMPTZ NOT NULL
);

-- Document ingest jobs
CREATE TABLE IF NOT EXISTS ingest_jobs (
    job_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    payload JSONB NOT NULL,
    total_chunks BIGINT NOT NULL DEFAULT 0,
    completed_chunks BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error_message TEXT,
    CHECK (completed_chunks <= total_chunks)
);

CREATE INDEX IF NOT EXISTS idx_knowledge_metadata_collection ON knowledge_metadata(collection);
CREATE INDEX IF NOT EXISTS idx_ingest_history_record ON ingest_history(record_id);
CREATE INDEX IF NOT EXISTS idx_ingest_jobs_pending ON ingest_jobs(created_at) WHERE status = 'pending';
"#;

/// SQLite schema
pub const SQLITE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_metadata (
    record_id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    source_scenario TEXT,
    source_type TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    source_scenario TEXT,
    source_type TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_jobs (
    job_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    completed_chunks INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    CHECK (completed_chunks <= total_chunks)
);

CREATE INDEX IF NOT EXISTS idx_knowledge_metadata_collection ON knowledge_metadata(collection);
CREATE INDEX IF NOT EXISTS idx_ingest_history_record ON ingest_history(record_id);
CREATE INDEX IF NOT EXISTS idx_ingest_jobs_status ON ingest_jobs(status, created_at);
"#;
