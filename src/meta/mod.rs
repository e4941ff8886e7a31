//! Relational metadata store
//!
//! This module mirrors what lives in the vector store:
//! - Knowledge metadata (record id to collection index)
//! - Ingest history (append-only write log)
//! - Document ingest jobs (the async queue)
//!
//! Two backends implement [`MetadataStore`]: Postgres for deployments and
//! SQLite for single-node runs and tests. [`connect`] picks one from the
//! database URL.

mod postgres;
mod schema;
mod sqlite;

pub use postgres::*;
pub use schema::*;
pub use sqlite::*;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::DocumentIngestRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::Store(format!("Unknown job status: {}", s))),
        }
    }
}

/// Index row for one live record
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct KnowledgeMetadata {
    pub record_id: String,
    pub collection: String,
    pub content_hash: String,
    pub source_scenario: Option<String>,
    pub source_type: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One successful write, as appended to the ingest history
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct IngestHistoryRow {
    pub record_id: String,
    pub collection: String,
    pub content_hash: String,
    pub source_scenario: Option<String>,
    pub source_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IngestHistoryRow {
    pub fn from_metadata(meta: &KnowledgeMetadata) -> Self {
        Self {
            record_id: meta.record_id.clone(),
            collection: meta.collection.clone(),
            content_hash: meta.content_hash.clone(),
            source_scenario: meta.source_scenario.clone(),
            source_type: meta.source_type.clone(),
            created_at: meta.updated_at,
        }
    }
}

/// A queued document ingest
#[derive(Debug, Clone)]
pub struct DocumentIngestJob {
    pub job_id: String,
    pub status: JobStatus,
    pub payload: DocumentIngestRequest,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Raw job row shared by both backends
#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    job_id: String,
    status: String,
    payload: Json<DocumentIngestRequest>,
    total_chunks: i64,
    completed_chunks: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl TryFrom<JobRow> for DocumentIngestJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            job_id: row.job_id,
            payload: row.payload.0,
            total_chunks: row.total_chunks.max(0) as u64,
            completed_chunks: row.completed_chunks.max(0) as u64,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

/// Column list selected for job rows
pub(crate) const JOB_COLUMNS: &str = "job_id, status, payload, total_chunks, completed_chunks, \
     created_at, started_at, completed_at, error_message";

/// Metadata store contract
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create tables and indexes if they do not exist
    async fn init_schema(&self) -> Result<()>;

    /// Round-trip to the database
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    async fn upsert_knowledge_metadata(
        &self,
        cancel: &CancellationToken,
        row: &KnowledgeMetadata,
    ) -> Result<()>;

    async fn insert_ingest_history(
        &self,
        cancel: &CancellationToken,
        row: &IngestHistoryRow,
    ) -> Result<()>;

    /// History rows for a record, oldest first
    async fn ingest_history(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<Vec<IngestHistoryRow>>;

    /// Collection that holds `record_id`, if the record is known
    async fn lookup_collection_for_vector_id(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<Option<String>>;

    /// Remove the index row; returns whether a row was removed
    async fn delete_knowledge_metadata(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<bool>;

    /// Store a pending job and return its id
    async fn enqueue_document_ingest(
        &self,
        cancel: &CancellationToken,
        request: &DocumentIngestRequest,
    ) -> Result<String>;

    async fn get_job(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
    ) -> Result<Option<DocumentIngestJob>>;

    /// Atomically move the oldest pending job to running and return it
    async fn claim_next_pending_job(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<DocumentIngestJob>>;

    /// Record progress on a running job; counters never move backwards
    async fn update_job_progress(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        completed: u64,
        total: u64,
    ) -> Result<()>;

    /// Move a non-terminal job to `succeeded` or `failed`
    async fn complete_job(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
}

/// Open the metadata store named by the configured database URL
pub async fn connect(config: &Config) -> Result<Arc<dyn MetadataStore>> {
    let url = config.database_url.as_str();
    let store: Arc<dyn MetadataStore> = if url.starts_with("sqlite:") {
        info!("Using SQLite metadata store");
        Arc::new(SqliteMetaStore::connect(url, &config.tuning).await?)
    } else {
        info!("Using Postgres metadata store");
        Arc::new(PgMetaStore::connect(url, &config.tuning).await?)
    };
    Ok(store)
}

pub(crate) fn check_progress(completed: u64, total: u64) -> Result<(i64, i64)> {
    if completed > total {
        return Err(Error::validation(format!(
            "completed_chunks ({}) cannot exceed total_chunks ({})",
            completed, total
        )));
    }
    let to_i64 = |v: u64| {
        i64::try_from(v).map_err(|_| Error::validation(format!("chunk count {} is too large", v)))
    };
    Ok((to_i64(completed)?, to_i64(total)?))
}

pub(crate) fn check_terminal(status: JobStatus) -> Result<()> {
    if !status.is_terminal() {
        return Err(Error::validation(format!(
            "jobs can only be completed as succeeded or failed, not {}",
            status
        )));
    }
    Ok(())
}
