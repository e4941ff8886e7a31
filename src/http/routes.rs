use super::{ApiError, AppState};
use crate::models::{
    CollectionSummary, CollectionsResponse, DeleteRecordResponse, DocumentIngestRequest,
    DocumentIngestResponse, GraphRequest, GraphResponse, JobCreateResponse, JobStatusResponse,
    QualityReport, SearchRequest, SearchResponse, UpsertRecordRequest, UpsertRecordResponse,
};
use crate::ingest::NoProgress;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::warn;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Liveness plus database reachability
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let cancel = state.request_token();
    match state.meta.ping(&cancel).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "checks": {"database": "ok"}})),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "checks": {"database": "fail"}})),
            )
        }
    }
}

pub async fn upsert_record(
    State(state): State<AppState>,
    payload: Result<Json<UpsertRecordRequest>, JsonRejection>,
) -> ApiResult<UpsertRecordResponse> {
    let Json(req) = payload?;
    let cancel = state.request_token();
    state
        .ingest
        .upsert_record(&cancel, &req)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "upsert_record", req.record_id.as_deref()))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> ApiResult<DeleteRecordResponse> {
    let cancel = state.request_token();
    state
        .ingest
        .delete_record(&cancel, &record_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "delete_record", Some(&record_id)))
}

/// Synchronous chunked ingest
pub async fn ingest_document(
    State(state): State<AppState>,
    payload: Result<Json<DocumentIngestRequest>, JsonRejection>,
) -> ApiResult<DocumentIngestResponse> {
    let Json(req) = payload?;
    let cancel = state.request_token();
    state
        .ingest
        .ingest_document(&cancel, &req, &NoProgress)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "ingest_document", req.document_id.as_deref()))
}

pub async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<SearchResponse> {
    let Json(req) = payload?;
    let cancel = state.request_token();
    state
        .search
        .search(&cancel, &req)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "search", None))
}

/// Graph parameters as a query string; list fields are comma separated
#[derive(Debug, Default, Deserialize)]
pub struct GraphQuery {
    center_concept: Option<String>,
    collection: Option<String>,
    namespaces: Option<String>,
    visibility: Option<String>,
    tags: Option<String>,
    depth: Option<i64>,
    limit: Option<i64>,
    threshold: Option<f64>,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl From<GraphQuery> for GraphRequest {
    fn from(q: GraphQuery) -> Self {
        Self {
            center_concept: q.center_concept,
            collection: q.collection,
            namespaces: split_list(q.namespaces),
            visibility: split_list(q.visibility),
            tags: split_list(q.tags),
            depth: q.depth,
            limit: q.limit,
            threshold: q.threshold,
        }
    }
}

async fn run_graph(state: AppState, req: GraphRequest) -> ApiResult<GraphResponse> {
    let cancel = state.request_token();
    state
        .graph
        .graph(&cancel, &req)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "graph", req.center_concept.as_deref()))
}

pub async fn graph_from_query(
    State(state): State<AppState>,
    query: Result<Query<GraphQuery>, QueryRejection>,
) -> ApiResult<GraphResponse> {
    let Query(query) = query?;
    run_graph(state, query.into()).await
}

pub async fn graph_from_body(
    State(state): State<AppState>,
    payload: Result<Json<GraphRequest>, JsonRejection>,
) -> ApiResult<GraphResponse> {
    let Json(req) = payload?;
    run_graph(state, req).await
}

#[derive(Debug, Default, Deserialize)]
pub struct QualityQuery {
    collection: Option<String>,
}

pub async fn quality(
    State(state): State<AppState>,
    query: Result<Query<QualityQuery>, QueryRejection>,
) -> ApiResult<QualityReport> {
    let Query(query) = query?;
    let cancel = state.request_token();
    state
        .quality
        .report(&cancel, query.collection.as_deref())
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "quality", query.collection.as_deref()))
}

pub async fn collections(State(state): State<AppState>) -> ApiResult<CollectionsResponse> {
    let started = Instant::now();
    let cancel = state.request_token();
    let fail = |e| ApiError::from_service(e, "collections", None);

    let names = state.vectors.list_collections(&cancel).await.map_err(fail)?;
    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let points_count = state
            .vectors
            .count_points(&cancel, &name)
            .await
            .map_err(fail)?;
        collections.push(CollectionSummary { name, points_count });
    }

    Ok(Json(CollectionsResponse {
        collections,
        took_ms: started.elapsed().as_millis() as u64,
    }))
}

pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<DocumentIngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobCreateResponse>), ApiError> {
    let Json(req) = payload?;
    let cancel = state.request_token();
    let created = state
        .jobs
        .enqueue(&cancel, &req)
        .await
        .map_err(|e| ApiError::from_service(e, "create_job", req.document_id.as_deref()))?;
    Ok((StatusCode::ACCEPTED, Json(created)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobStatusResponse> {
    let cancel = state.request_token();
    state
        .jobs
        .get(&cancel, &job_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_service(e, "get_job", Some(&job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_query_splits_lists() {
        let req: GraphRequest = GraphQuery {
            center_concept: Some("rust".into()),
            namespaces: Some("a, b,,c ".into()),
            tags: Some(String::new()),
            depth: Some(2),
            ..Default::default()
        }
        .into();

        assert_eq!(req.namespaces, vec!["a", "b", "c"]);
        assert!(req.tags.is_empty());
        assert!(req.visibility.is_empty());
        assert_eq!(req.depth, Some(2));
    }
}
