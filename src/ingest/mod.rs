//! Ingest service
//!
//! Writes records through to the vector store and mirrors them in the
//! metadata store. The vector store is the system of record: when the
//! metadata write fails after a successful upsert the call still succeeds
//! and the inconsistency is logged.

use crate::cancel::CancellationToken;
use crate::chunk::{
    chunk_text, hash_document, hash_external_id, point_id_for_record, record_id_for_chunk,
    uuid_from_digest, ChunkParams,
};
use crate::config::IngestConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::meta::{IngestHistoryRow, KnowledgeMetadata, MetadataStore};
use crate::models::{
    DeleteRecordResponse, DocumentIngestRequest, DocumentIngestResponse, UpsertRecordRequest,
    UpsertRecordResponse,
};
use crate::store::{Point, RecordPayload, VectorStore, Visibility, SCHEMA_VERSION};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives chunk progress during a document ingest
#[async_trait]
pub trait IngestProgress: Send + Sync {
    /// Called once with `(0, total)` before the first chunk and after each
    /// chunk is written
    async fn on_progress(&self, completed: usize, total: usize);
}

/// Progress sink that ignores updates
pub struct NoProgress;

#[async_trait]
impl IngestProgress for NoProgress {
    async fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Fields shared by single records and documents, after validation
#[derive(Debug, Clone)]
struct Normalized {
    namespace: String,
    collection: String,
    content: String,
    tags: Vec<String>,
    metadata: Map<String, Value>,
    visibility: Visibility,
    source: Option<String>,
    source_type: Option<String>,
}

/// One record ready to embed and write
#[derive(Debug, Clone)]
struct RecordWrite {
    record_id: String,
    external_id: Option<String>,
    document_id: Option<String>,
    chunk_index: Option<u64>,
    fields: Normalized,
}

#[derive(Debug)]
struct Written {
    record_id: String,
    content_hash: String,
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Trim, de-duplicate and order tags
fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Ingest service handle
#[derive(Clone)]
pub struct IngestService {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    meta: Arc<dyn MetadataStore>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        meta: Arc<dyn MetadataStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            meta,
            config,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn normalize(
        &self,
        namespace: Option<&str>,
        collection: Option<&str>,
        content: Option<&str>,
        visibility: Option<&str>,
        tags: &[String],
        metadata: &Map<String, Value>,
        source: Option<&str>,
        source_type: Option<&str>,
    ) -> Result<Normalized> {
        let namespace =
            trimmed(namespace).ok_or_else(|| Error::validation("namespace is required"))?;
        let content = trimmed(content).ok_or_else(|| Error::validation("content is required"))?;
        let visibility = match trimmed(visibility) {
            Some(v) => v.parse()?,
            None => Visibility::default(),
        };

        Ok(Normalized {
            namespace,
            collection: trimmed(collection)
                .unwrap_or_else(|| self.config.default_collection.clone()),
            content,
            tags: normalize_tags(tags),
            metadata: metadata.clone(),
            visibility,
            source: trimmed(source),
            source_type: trimmed(source_type),
        })
    }

    /// Validate a document request and assign its document id
    pub fn prepare_document(&self, req: &DocumentIngestRequest) -> Result<DocumentIngestRequest> {
        let fields = self.normalize(
            req.namespace.as_deref(),
            req.collection.as_deref(),
            req.content.as_deref(),
            req.visibility.as_deref(),
            &req.tags,
            &req.metadata,
            req.source.as_deref(),
            req.source_type.as_deref(),
        )?;
        let params = ChunkParams::resolve(req.chunk_size, req.chunk_overlap, &self.config)?;

        Ok(DocumentIngestRequest {
            namespace: Some(fields.namespace),
            collection: Some(fields.collection),
            document_id: Some(
                trimmed(req.document_id.as_deref()).unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            content: Some(fields.content),
            tags: fields.tags,
            metadata: fields.metadata,
            visibility: Some(fields.visibility.to_string()),
            source: fields.source,
            source_type: fields.source_type,
            chunk_size: Some(params.size as i64),
            chunk_overlap: Some(params.overlap as i64),
        })
    }

    /// Embed and write a single record
    pub async fn upsert_record(
        &self,
        cancel: &CancellationToken,
        req: &UpsertRecordRequest,
    ) -> Result<UpsertRecordResponse> {
        let started = Instant::now();

        let fields = self.normalize(
            req.namespace.as_deref(),
            req.collection.as_deref(),
            req.content.as_deref(),
            req.visibility.as_deref(),
            &req.tags,
            &req.metadata,
            req.source.as_deref(),
            req.source_type.as_deref(),
        )?;

        let external_id = trimmed(req.external_id.as_deref());
        let record_id = match (trimmed(req.record_id.as_deref()), &external_id) {
            (Some(id), _) => id,
            (None, Some(ext)) => uuid_from_digest(&hash_external_id(&fields.namespace, ext)),
            (None, None) => uuid_from_digest(&hash_document(&fields.namespace, &fields.content)),
        };

        let write = RecordWrite {
            record_id,
            external_id,
            document_id: trimmed(req.document_id.as_deref()),
            chunk_index: req.chunk_index,
            fields,
        };
        let namespace = write.fields.namespace.clone();
        let collection = write.fields.collection.clone();

        let written = self.write_record(cancel, write).await?;

        Ok(UpsertRecordResponse {
            record_id: written.record_id,
            collection,
            namespace,
            content_hash: written.content_hash,
            upserted: true,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn write_record(&self, cancel: &CancellationToken, write: RecordWrite) -> Result<Written> {
        let fields = write.fields;
        let content_hash = hash_document(&fields.namespace, &fields.content);

        let vector = self.embedder.embed(cancel, &fields.content).await?;
        self.vectors
            .ensure_collection(cancel, &fields.collection, vector.len())
            .await?;

        let now = Utc::now();
        let payload = RecordPayload {
            record_id: Some(write.record_id.clone()),
            namespace: Some(fields.namespace.clone()),
            collection: Some(fields.collection.clone()),
            document_id: write.document_id,
            chunk_index: write.chunk_index,
            external_id: write.external_id,
            content: Some(fields.content),
            content_hash: Some(content_hash.clone()),
            tags: fields.tags,
            metadata: fields.metadata,
            visibility: Some(fields.visibility),
            source: fields.source,
            source_type: fields.source_type.clone(),
            ingested_at_ms: Some(now.timestamp_millis()),
            schema_version: Some(SCHEMA_VERSION.to_string()),
            extra: Map::new(),
        };

        let point = Point {
            id: point_id_for_record(&write.record_id),
            vector,
            payload,
        };
        self.vectors
            .upsert_point(cancel, &fields.collection, point)
            .await?;

        let row = KnowledgeMetadata {
            record_id: write.record_id.clone(),
            collection: fields.collection.clone(),
            content_hash: content_hash.clone(),
            source_scenario: Some(fields.namespace.clone()),
            source_type: fields.source_type,
            updated_at: now,
        };
        if let Err(e) = self.mirror_metadata(cancel, &row).await {
            warn!(
                record_id = %row.record_id,
                collection = %row.collection,
                "Record is live in the vector store but the metadata write failed: {}",
                e
            );
        }

        debug!(record_id = %write.record_id, collection = %fields.collection, "Record upserted");

        Ok(Written {
            record_id: write.record_id,
            content_hash,
        })
    }

    async fn mirror_metadata(&self, cancel: &CancellationToken, row: &KnowledgeMetadata) -> Result<()> {
        self.meta.upsert_knowledge_metadata(cancel, row).await?;
        self.meta
            .insert_ingest_history(cancel, &IngestHistoryRow::from_metadata(row))
            .await
    }

    /// Remove a record from its collection and drop its index row
    pub async fn delete_record(
        &self,
        cancel: &CancellationToken,
        record_id: &str,
    ) -> Result<DeleteRecordResponse> {
        let started = Instant::now();
        let record_id = record_id.trim();
        if record_id.is_empty() {
            return Err(Error::validation("record_id is required"));
        }

        let collection = self
            .meta
            .lookup_collection_for_vector_id(cancel, record_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("record '{}' not found", record_id)))?;

        self.vectors
            .delete_point(cancel, &collection, &point_id_for_record(record_id))
            .await?;

        if let Err(e) = self.meta.delete_knowledge_metadata(cancel, record_id).await {
            warn!(
                record_id,
                collection = %collection,
                "Point deleted but the metadata row could not be removed: {}",
                e
            );
        }

        info!(record_id, collection = %collection, "Record deleted");

        Ok(DeleteRecordResponse {
            record_id: record_id.to_string(),
            collection,
            deleted: true,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Chunk a document and write every chunk as its own record.
    ///
    /// Stops at the first failing chunk; chunks already written stay.
    pub async fn ingest_document(
        &self,
        cancel: &CancellationToken,
        req: &DocumentIngestRequest,
        progress: &dyn IngestProgress,
    ) -> Result<DocumentIngestResponse> {
        let started = Instant::now();
        let req = self.prepare_document(req)?;

        let fields = self.normalize(
            req.namespace.as_deref(),
            req.collection.as_deref(),
            req.content.as_deref(),
            req.visibility.as_deref(),
            &req.tags,
            &req.metadata,
            req.source.as_deref(),
            req.source_type.as_deref(),
        )?;
        let params = ChunkParams::resolve(req.chunk_size, req.chunk_overlap, &self.config)?;
        let document_id = req.document_id.unwrap_or_default();

        let all_chunks = chunk_text(&fields.content, params.size, params.overlap, params.max_chunks);
        let produced = all_chunks.len();
        let chunks: Vec<String> = all_chunks
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if chunks.len() < produced {
            debug!(
                document_id = %document_id,
                skipped = produced - chunks.len(),
                "Skipping whitespace-only chunks"
            );
        }

        let total = chunks.len();
        info!(
            document_id = %document_id,
            namespace = %fields.namespace,
            collection = %fields.collection,
            chunks = total,
            size = params.size,
            overlap = params.overlap,
            "Ingesting document"
        );
        progress.on_progress(0, total).await;

        let mut record_ids = Vec::with_capacity(total);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let record_id = record_id_for_chunk(&fields.namespace, &document_id, index, &chunk);
            let write = RecordWrite {
                record_id,
                external_id: None,
                document_id: Some(document_id.clone()),
                chunk_index: Some(index as u64),
                fields: Normalized {
                    content: chunk,
                    ..fields.clone()
                },
            };

            let written = self.write_record(cancel, write).await.map_err(|e| {
                warn!(document_id = %document_id, chunk_index = index, "Chunk ingest failed: {}", e);
                e
            })?;
            record_ids.push(written.record_id);
            progress.on_progress(index + 1, total).await;
        }

        Ok(DocumentIngestResponse {
            document_id,
            collection: fields.collection,
            content_hash: hash_document(&fields.namespace, &fields.content),
            namespace: fields.namespace,
            chunk_count: record_ids.len(),
            record_ids,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::SearchFilter;
    use crate::testing::{fixture, StubEmbedder};
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(usize, usize)>>);

    #[async_trait]
    impl IngestProgress for Recorder {
        async fn on_progress(&self, completed: usize, total: usize) {
            self.0.lock().unwrap().push((completed, total));
        }
    }

    fn upsert(namespace: &str, content: &str) -> UpsertRecordRequest {
        UpsertRecordRequest {
            namespace: Some(namespace.to_string()),
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_defaults_and_metadata_mirror() {
        let fx = fixture(StubEmbedder::new(vec![1.0, 0.0, 0.0])).await;
        let cancel = CancellationToken::new();

        let mut req = upsert("  ns1 ", "  hello world ");
        req.tags = vec!["b".into(), "a".into(), "b".into(), " ".into()];
        let resp = fx.ingest.upsert_record(&cancel, &req).await.unwrap();

        assert_eq!(resp.namespace, "ns1");
        assert_eq!(resp.collection, "knowledge_chunks_v1");
        assert_eq!(resp.content_hash, hash_document("ns1", "hello world"));
        assert!(Uuid::parse_str(&resp.record_id).is_ok());

        assert_eq!(
            fx.meta
                .lookup_collection_for_vector_id(&cancel, &resp.record_id)
                .await
                .unwrap()
                .as_deref(),
            Some("knowledge_chunks_v1")
        );
        assert_eq!(
            fx.meta.ingest_history(&cancel, &resp.record_id).await.unwrap().len(),
            1
        );

        let points = fx
            .vectors
            .sample_points(&cancel, "knowledge_chunks_v1", 10)
            .await
            .unwrap();
        let payload = &points[0].payload;
        assert_eq!(payload.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(payload.visibility, Some(Visibility::Shared));
        assert_eq!(payload.schema_version.as_deref(), Some(SCHEMA_VERSION));
        assert!(payload.ingested_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_external_id_makes_upserts_idempotent() {
        let fx = fixture(StubEmbedder::new(vec![1.0, 0.0, 0.0])).await;
        let cancel = CancellationToken::new();

        let mut req = upsert("ns1", "hello world");
        req.external_id = Some("x1".into());
        let first = fx.ingest.upsert_record(&cancel, &req).await.unwrap();
        let second = fx.ingest.upsert_record(&cancel, &req).await.unwrap();

        assert_eq!(first.record_id, second.record_id);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(
            fx.vectors
                .count_points(&cancel, "knowledge_chunks_v1")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_caller_record_id_is_preserved() {
        let fx = fixture(StubEmbedder::new(vec![0.0, 1.0])).await;
        let cancel = CancellationToken::new();

        let mut req = upsert("ns", "body");
        req.record_id = Some("order-42".into());
        let resp = fx.ingest.upsert_record(&cancel, &req).await.unwrap();
        assert_eq!(resp.record_id, "order-42");

        let hits = fx
            .vectors
            .search(&cancel, "knowledge_chunks_v1", &[0.0, 1.0], 5, 0.0, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, point_id_for_record("order-42"));
        assert_eq!(hits[0].payload.record_id.as_deref(), Some("order-42"));

        fx.ingest.delete_record(&cancel, "order-42").await.unwrap();
        assert_eq!(
            fx.vectors
                .count_points(&cancel, "knowledge_chunks_v1")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let fx = fixture(StubEmbedder::new(vec![1.0])).await;
        let cancel = CancellationToken::new();

        let err = fx
            .ingest
            .upsert_record(&cancel, &upsert("", "content"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = fx
            .ingest
            .upsert_record(&cancel, &upsert("ns", "   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut req = upsert("ns", "content");
        req.visibility = Some("public".into());
        let err = fx.ingest.upsert_record(&cancel, &req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_then_second_delete_is_not_found() {
        let fx = fixture(StubEmbedder::new(vec![1.0, 0.0])).await;
        let cancel = CancellationToken::new();

        let resp = fx
            .ingest
            .upsert_record(&cancel, &upsert("ns", "to delete"))
            .await
            .unwrap();
        let deleted = fx.ingest.delete_record(&cancel, &resp.record_id).await.unwrap();
        assert_eq!(deleted.collection, "knowledge_chunks_v1");
        assert!(deleted.deleted);

        let err = fx
            .ingest
            .delete_record(&cancel, &resp.record_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // History survives deletion.
        assert_eq!(
            fx.meta.ingest_history(&cancel, &resp.record_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_document_ingest_chunks_and_reports_progress() {
        let fx = fixture(StubEmbedder::new(vec![1.0, 0.0, 0.0])).await;
        let cancel = CancellationToken::new();
        let content: String = ('a'..='z').chain('A'..='U').collect();

        let req = DocumentIngestRequest {
            namespace: Some("docs".into()),
            content: Some(content.clone()),
            chunk_size: Some(10),
            chunk_overlap: Some(2),
            ..Default::default()
        };
        let recorder = Recorder(Mutex::new(Vec::new()));
        let resp = fx
            .ingest
            .ingest_document(&cancel, &req, &recorder)
            .await
            .unwrap();

        assert_eq!(resp.chunk_count, 6);
        assert_eq!(resp.record_ids.len(), 6);
        assert_eq!(resp.record_ids.iter().collect::<BTreeSet<_>>().len(), 6);
        assert!(Uuid::parse_str(&resp.document_id).is_ok());
        assert_eq!(resp.content_hash, hash_document("docs", &content));

        let progress = recorder.0.lock().unwrap().clone();
        assert_eq!(progress.first(), Some(&(0, 6)));
        assert_eq!(progress.last(), Some(&(6, 6)));
        assert_eq!(progress.len(), 7);

        // Same document id and content yields the same ids.
        let mut again = req.clone();
        again.document_id = Some(resp.document_id.clone());
        let second = fx
            .ingest
            .ingest_document(&cancel, &again, &NoProgress)
            .await
            .unwrap();
        assert_eq!(second.record_ids, resp.record_ids);
        assert_eq!(
            fx.vectors
                .count_points(&cancel, "knowledge_chunks_v1")
                .await
                .unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn test_document_ingest_keeps_partial_chunks_on_failure() {
        let embedder = StubEmbedder::new(vec![1.0, 0.0]).failing_on("CCCC");
        let fx = fixture(embedder).await;
        let cancel = CancellationToken::new();

        let req = DocumentIngestRequest {
            namespace: Some("docs".into()),
            content: Some("AAAABBBBCCCCDDDD".into()),
            chunk_size: Some(4),
            chunk_overlap: Some(0),
            ..Default::default()
        };
        let err = fx
            .ingest
            .ingest_document(&cancel, &req, &NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Embedding);
        assert_eq!(
            fx.vectors
                .count_points(&cancel, "knowledge_chunks_v1")
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_cancelled_upsert_writes_nothing() {
        let fx = fixture(StubEmbedder::new(vec![1.0])).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .ingest
            .upsert_record(&cancel, &upsert("ns", "content"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(fx
            .vectors
            .list_collections(&CancellationToken::new())
            .await
            .unwrap()
            .is_empty());
    }
}
