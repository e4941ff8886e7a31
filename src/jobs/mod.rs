//! Asynchronous document ingest jobs
//!
//! Requests are validated and queued in the metadata store. A pool of
//! workers claims pending jobs one at a time, drives the ingest service and
//! records progress. Claims are atomic in the store, so workers share no
//! in-process state beyond the shutdown token.

use crate::cancel::CancellationToken;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::ingest::{IngestProgress, IngestService};
use crate::meta::{DocumentIngestJob, JobStatus, MetadataStore};
use crate::models::{DocumentIngestRequest, JobCreateResponse, JobStatusResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Writes chunk progress for one running job
struct JobProgress<'a> {
    meta: &'a dyn MetadataStore,
    job_id: &'a str,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl IngestProgress for JobProgress<'_> {
    async fn on_progress(&self, completed: usize, total: usize) {
        if let Err(e) = self
            .meta
            .update_job_progress(self.cancel, self.job_id, completed as u64, total as u64)
            .await
        {
            warn!(job_id = %self.job_id, completed, total, "Failed to record job progress: {}", e);
        }
    }
}

impl From<DocumentIngestJob> for JobStatusResponse {
    fn from(job: DocumentIngestJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status.to_string(),
            total_chunks: job.total_chunks,
            completed_chunks: job.completed_chunks,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            error_message: job.error_message,
        }
    }
}

/// Job queue front end and executor
#[derive(Clone)]
pub struct JobService {
    meta: Arc<dyn MetadataStore>,
    ingest: IngestService,
}

impl JobService {
    pub fn new(meta: Arc<dyn MetadataStore>, ingest: IngestService) -> Self {
        Self { meta, ingest }
    }

    /// Validate and queue a document ingest
    pub async fn enqueue(
        &self,
        cancel: &CancellationToken,
        req: &DocumentIngestRequest,
    ) -> Result<JobCreateResponse> {
        let prepared = self.ingest.prepare_document(req)?;
        let document_id = prepared.document_id.clone().unwrap_or_default();
        let job_id = self.meta.enqueue_document_ingest(cancel, &prepared).await?;

        info!(job_id = %job_id, document_id = %document_id, "Document ingest queued");

        Ok(JobCreateResponse {
            job_id,
            status: JobStatus::Pending.to_string(),
            document_id,
        })
    }

    pub async fn get(&self, cancel: &CancellationToken, job_id: &str) -> Result<JobStatusResponse> {
        let job_id = job_id.trim();
        self.meta
            .get_job(cancel, job_id)
            .await?
            .map(JobStatusResponse::from)
            .ok_or_else(|| Error::not_found(format!("job '{}' not found", job_id)))
    }

    /// Run one claimed job to a terminal state
    pub async fn process(&self, cancel: &CancellationToken, job: DocumentIngestJob) -> JobStatus {
        let job_id = job.job_id;
        let progress = JobProgress {
            meta: self.meta.as_ref(),
            job_id: &job_id,
            cancel,
        };

        let outcome = self
            .ingest
            .ingest_document(cancel, &job.payload, &progress)
            .await;

        let (status, message) = match outcome {
            Ok(resp) => {
                info!(job_id = %job_id, chunks = resp.chunk_count, "Job succeeded");
                (JobStatus::Succeeded, None)
            }
            Err(Error::Cancelled) => {
                warn!(job_id = %job_id, "Job interrupted by shutdown");
                (JobStatus::Failed, Some("cancelled".to_string()))
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job failed");
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        // Finalize even when the worker is shutting down.
        let finalize = CancellationToken::new();
        if let Err(e) = self
            .meta
            .complete_job(&finalize, &job_id, status, message.as_deref())
            .await
        {
            error!(job_id = %job_id, error = %e, "Failed to record job completion");
        }

        status
    }

    /// Claim and run the next pending job, if any
    pub async fn run_next(&self, cancel: &CancellationToken) -> Result<Option<JobStatus>> {
        match self.meta.claim_next_pending_job(cancel).await? {
            Some(job) => {
                info!(job_id = %job.job_id, "Claimed ingest job");
                Ok(Some(self.process(cancel, job).await))
            }
            None => Ok(None),
        }
    }
}

/// Worker loop: claim, run, back off when idle, until `shutdown` fires
pub async fn run_worker_loop(jobs: JobService, config: WorkerConfig, shutdown: CancellationToken) {
    let worker_id = format!("ingest-worker-{}", Uuid::new_v4());
    let idle_backoff = Duration::from_millis(config.idle_backoff_ms);
    let error_backoff = Duration::from_millis(config.error_backoff_ms);
    info!(%worker_id, "Worker started");

    while !shutdown.is_cancelled() {
        let pause = match jobs.run_next(&shutdown).await {
            Ok(Some(_)) => continue,
            Ok(None) => idle_backoff,
            Err(Error::Cancelled) => break,
            Err(err) => {
                error!(%worker_id, error = %err, "Failed to claim ingest job");
                warn!("Backing off for {}ms after claim error", error_backoff.as_millis());
                error_backoff
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(pause) => {}
        }
    }

    info!(%worker_id, "Worker stopped");
}

/// Start `config.count` workers sharing one shutdown token
pub fn spawn_workers(
    jobs: &JobService,
    config: &WorkerConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..config.count.max(1))
        .map(|_| {
            tokio::spawn(run_worker_loop(
                jobs.clone(),
                config.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}
