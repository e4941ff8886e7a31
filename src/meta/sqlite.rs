//! SQLite metadata backend

use super::{
    check_progress, check_terminal, DocumentIngestJob, IngestHistoryRow, JobRow, JobStatus,
    KnowledgeMetadata, MetadataStore, JOB_COLUMNS, SQLITE_SCHEMA_SQL,
};
use crate::cancel::{guarded, CancellationToken};
use crate::config::Tuning;
use crate::error::{ErrorKind, Result};
use crate::models::DocumentIngestRequest;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetaStore {
    pool: SqlitePool,
    budget: Duration,
}

impl SqliteMetaStore {
    /// Open (and create if missing) the database at `url`
    pub async fn connect(url: &str, tuning: &Tuning) -> Result<Self> {
        debug!("Connecting to SQLite metadata store at {}", url);

        let budget = tuning.timeouts.database();
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(budget);

        // An in-memory database exists per connection, so keep exactly one.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let db = &tuning.database;
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .max_lifetime(None)
                .idle_timeout(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(db.max_connections)
                .min_connections(db.min_connections)
                .max_lifetime(Duration::from_secs(db.max_lifetime_secs))
        };

        let pool = pool_options
            .acquire_timeout(budget)
            .connect_with(options)
            .await?;

        Ok(Self { pool, budget })
    }

    async fn run<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        guarded(cancel, ErrorKind::Store, self.budget, fut).await
    }
}

#[async_trait]
impl MetadataStore for SqliteMetaStore {
    async fn init_schema(&self) -> Result<()> {
        info!("Initializing SQLite schema");
        sqlx::raw_sql(SQLITE_SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.run(cancel, async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn upsert_knowledge_metadata(
        &self,
        cancel: &CancellationToken,
        row: &KnowledgeMetadata,
    ) -> Result<()> {
        self.run(cancel, async {
            sqlx::query(
                r#"
                INSERT INTO knowledge_metadata
                    (record_id, collection, content_hash, source_scenario, source_type, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(record_id) DO UPDATE SET
                    collection = excluded.collection,
                    content_hash = excluded.content_hash,
                    source_scenario = excluded.source_scenario,
                    source_type = excluded.source_type,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.record_id)
            .bind(&row.collection)
            .bind(&row.content_hash)
            .bind(&row.source_scenario)
            .bind(&row.source_type)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn insert_ingest_history(
        &self,
        cancel: &CancellationToken,
        row: &IngestHistoryRow,
    ) -> Result<()> {
        self.run(cancel, async {
            sqlx::query(
                r#"
                INSERT INTO ingest_history
                    (record_id, collection, content_hash, source_scenario, source_type, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.record_id)
            .bind(&row.collection)
            .bind(&row.content_hash)
            .bind(&row.source_scenario)
            .bind(&row.source_type)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn ingest_history(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<Vec<IngestHistoryRow>> {
        self.run(cancel, async {
            let rows = sqlx::query_as::<_, IngestHistoryRow>(
                r#"
                SELECT record_id, collection, content_hash, source_scenario, source_type, created_at
                FROM ingest_history WHERE record_id = ? ORDER BY id
                "#,
            )
            .bind(record_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    async fn lookup_collection_for_vector_id(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<Option<String>> {
        self.run(cancel, async {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT collection FROM knowledge_metadata WHERE record_id = ?")
                    .bind(record_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(c,)| c))
        })
        .await
    }

    async fn delete_knowledge_metadata(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<bool> {
        self.run(cancel, async {
            let result = sqlx::query("DELETE FROM knowledge_metadata WHERE record_id = ?")
                .bind(record_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn enqueue_document_ingest(
        &self,
        cancel: &CancellationToken,
        request: &DocumentIngestRequest,
    ) -> Result<String> {
        let job_id = Uuid::new_v4().to_string();
        self.run(cancel, async {
            sqlx::query(
                "INSERT INTO ingest_jobs (job_id, status, payload, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&job_id)
            .bind(JobStatus::Pending.as_str())
            .bind(Json(request))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        debug!(job_id = %job_id, "Enqueued document ingest");
        Ok(job_id)
    }

    async fn get_job(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
    ) -> Result<Option<DocumentIngestJob>> {
        self.run(cancel, async {
            let row = sqlx::query_as::<_, JobRow>(&format!(
                "SELECT {} FROM ingest_jobs WHERE job_id = ?",
                JOB_COLUMNS
            ))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(DocumentIngestJob::try_from).transpose()
        })
        .await
    }

    async fn claim_next_pending_job(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<DocumentIngestJob>> {
        // A single UPDATE is atomic under SQLite's writer lock; the status
        // re-check keeps a raced row from being claimed twice.
        self.run(cancel, async {
            let row = sqlx::query_as::<_, JobRow>(&format!(
                r#"
                UPDATE ingest_jobs SET status = 'running', started_at = ?
                WHERE job_id = (
                    SELECT job_id FROM ingest_jobs
                    WHERE status = 'pending'
                    ORDER BY created_at, job_id
                    LIMIT 1
                ) AND status = 'pending'
                RETURNING {}
                "#,
                JOB_COLUMNS
            ))
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
            row.map(DocumentIngestJob::try_from).transpose()
        })
        .await
    }

    async fn update_job_progress(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        completed: u64,
        total: u64,
    ) -> Result<()> {
        let (completed, total) = check_progress(completed, total)?;
        self.run(cancel, async {
            let result = sqlx::query(
                r#"
                UPDATE ingest_jobs
                SET total_chunks = ?3,
                    completed_chunks = MIN(?3, MAX(completed_chunks, ?2))
                WHERE job_id = ?1 AND status = 'running'
                "#,
            )
            .bind(job_id)
            .bind(completed)
            .bind(total)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                debug!(job_id, "Progress ignored for job that is not running");
            }
            Ok(())
        })
        .await
    }

    async fn complete_job(
        &self,
        cancel: &CancellationToken,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        check_terminal(status)?;
        let error_message = match status {
            JobStatus::Failed => error_message,
            _ => None,
        };

        self.run(cancel, async {
            let result = sqlx::query(
                r#"
                UPDATE ingest_jobs
                SET status = ?, error_message = ?, completed_at = ?
                WHERE job_id = ? AND status IN ('pending', 'running')
                "#,
            )
            .bind(status.as_str())
            .bind(error_message)
            .bind(Utc::now())
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                debug!(job_id, "Job already terminal or missing; completion ignored");
            }
            Ok(())
        })
        .await
    }
}
