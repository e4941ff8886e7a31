//! Qdrant REST client
//!
//! Deletes go through `POST /collections/{name}/points/delete` with a point
//! id selector, since Qdrant has no per-point DELETE route.

use super::{finalize_hits, Point, RecordPayload, ScoredPoint, SearchFilter, VectorStore};
use crate::cancel::{guarded, CancellationToken};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Page size used when scrolling for samples
const SCROLL_PAGE: usize = 256;

/// Qdrant store handle
pub struct QdrantStore {
    client: Client,
    base_url: Url,
    budget: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<CollectionName>,
}

#[derive(Debug, Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<RawPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    id: Value,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    vector: Option<Value>,
}

impl RawPoint {
    fn id_string(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn payload(&self) -> RecordPayload {
        self.payload.clone().map(RecordPayload::from).unwrap_or_default()
    }

    fn into_point(self) -> Result<Point> {
        let id = self.id_string();
        let payload = self.payload();
        let vector = match self.vector {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| Error::Store(format!("Point {} has a non-numeric vector", id)))?,
            Some(_) => {
                return Err(Error::Store(format!(
                    "Point {} uses named vectors which are not supported by this store",
                    id
                )))
            }
            None => Vec::new(),
        };
        Ok(Point {
            id,
            vector,
            payload,
        })
    }

    fn into_scored(self) -> ScoredPoint {
        ScoredPoint {
            id: self.id_string(),
            score: self.score.unwrap_or_default(),
            payload: self.payload(),
        }
    }
}

impl QdrantStore {
    /// Create a new store client for the given REST URL
    pub fn new(url: &str, api_key: Option<&str>, budget: Duration) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| Error::Config(format!("Invalid QDRANT_API_KEY: {}", e)))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(budget)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(url)?,
            budget,
        })
    }

    /// Build from service configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key.as_deref(),
            config.tuning.timeouts.vector_store(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid Qdrant URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request; `Ok(None)` when Qdrant answers 404
    async fn send(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        guarded(cancel, ErrorKind::Store, self.budget, async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::Store(format!("Qdrant request failed: {}", e)))?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_failure(status, &body));
            }

            let value = response
                .json::<Value>()
                .await
                .map_err(|e| Error::Store(format!("Malformed Qdrant response: {}", e)))?;
            Ok(Some(value))
        })
        .await
    }

    async fn send_expect<T: for<'de> Deserialize<'de>>(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: Url,
        body: Option<Value>,
        collection: &str,
    ) -> Result<T> {
        let value = self
            .send(cancel, method, url, body)
            .await?
            .ok_or_else(|| Error::not_found(format!("collection '{}' not found", collection)))?;
        let envelope: Envelope<T> = serde_json::from_value(value)
            .map_err(|e| Error::Store(format!("Unexpected Qdrant response: {}", e)))?;
        Ok(envelope.result)
    }

    /// Vector size of an existing collection, `None` if it does not exist
    async fn collection_vector_size(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<usize>> {
        let url = self.endpoint(&["collections", name])?;
        let Some(info) = self.send(cancel, Method::GET, url, None).await? else {
            return Ok(None);
        };

        let vectors = &info["result"]["config"]["params"]["vectors"];
        match vectors.get("size").and_then(Value::as_u64) {
            Some(size) => Ok(Some(size as usize)),
            None => Err(Error::Schema(format!(
                "Collection '{}' uses named vectors which are not supported by this store",
                name
            ))),
        }
    }

    fn check_size(name: &str, existing: usize, requested: usize) -> Result<()> {
        if existing != requested {
            return Err(Error::Schema(format!(
                "Collection '{}' has vector size {}, but the embedding has {}. Remediation: use a new collection name or reindex with the expected dimension.",
                name, existing, requested
            )));
        }
        Ok(())
    }
}

fn classify_failure(status: StatusCode, body: &str) -> Error {
    let lowered = body.to_lowercase();
    if status == StatusCode::BAD_REQUEST && lowered.contains("dimension") {
        Error::Schema(format!("Qdrant rejected vector: {}", body))
    } else {
        Error::Store(format!("Qdrant returned {}: {}", status, body))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        cancel: &CancellationToken,
        name: &str,
        vector_size: usize,
    ) -> Result<()> {
        if let Some(existing) = self.collection_vector_size(cancel, name).await? {
            debug!("Collection {} already exists", name);
            return Self::check_size(name, existing, vector_size);
        }

        info!("Creating collection {} with dimension {}", name, vector_size);

        let url = self.endpoint(&["collections", name])?;
        let body = json!({"vectors": {"size": vector_size, "distance": "Cosine"}});
        match self.send(cancel, Method::PUT, url, Some(body)).await {
            Ok(_) => {
                info!("Collection {} created successfully", name);
                Ok(())
            }
            Err(create_err) => {
                // Another writer may have created it first.
                match self.collection_vector_size(cancel, name).await? {
                    Some(existing) => Self::check_size(name, existing, vector_size),
                    None => Err(create_err),
                }
            }
        }
    }

    async fn collection_exists(&self, cancel: &CancellationToken, name: &str) -> Result<bool> {
        let url = self.endpoint(&["collections", name])?;
        Ok(self.send(cancel, Method::GET, url, None).await?.is_some())
    }

    async fn upsert_point(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        point: Point,
    ) -> Result<()> {
        debug!(collection, id = %point.id, "Upserting point");

        let mut url = self.endpoint(&["collections", collection, "points"])?;
        url.set_query(Some("wait=true"));
        let body = json!({
            "points": [{
                "id": point.id,
                "vector": point.vector,
                "payload": point.payload.to_json(),
            }]
        });

        self.send(cancel, Method::PUT, url, Some(body))
            .await?
            .ok_or_else(|| Error::not_found(format!("collection '{}' not found", collection)))?;
        Ok(())
    }

    async fn delete_point(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        id: &str,
    ) -> Result<()> {
        debug!(collection, id, "Deleting point");

        let mut url = self.endpoint(&["collections", collection, "points", "delete"])?;
        url.set_query(Some("wait=true"));
        self.send(cancel, Method::POST, url, Some(json!({"points": [id]})))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>> {
        debug!("Searching collection {} with limit {}", collection, limit);

        let url = self.endpoint(&["collections", collection, "points", "search"])?;
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": threshold,
            "with_payload": true,
        });
        if let Some(qdrant_filter) = filter.to_qdrant_filter() {
            body["filter"] = qdrant_filter;
        }

        let raw: Vec<RawPoint> = self
            .send_expect(cancel, Method::POST, url, Some(body), collection)
            .await?;
        let hits = raw.into_iter().map(RawPoint::into_scored).collect();
        Ok(finalize_hits(hits, threshold, limit))
    }

    async fn list_collections(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let url = self.endpoint(&["collections"])?;
        let list: CollectionList = self
            .send_expect(cancel, Method::GET, url, None, "*")
            .await?;
        Ok(list.collections.into_iter().map(|c| c.name).collect())
    }

    async fn count_points(&self, cancel: &CancellationToken, collection: &str) -> Result<usize> {
        let url = self.endpoint(&["collections", collection, "points", "count"])?;
        let count: CountResult = self
            .send_expect(
                cancel,
                Method::POST,
                url,
                Some(json!({"exact": true})),
                collection,
            )
            .await?;
        Ok(count.count)
    }

    async fn sample_points(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Point>> {
        let url = self.endpoint(&["collections", collection, "points", "scroll"])?;
        let mut points = Vec::with_capacity(limit);
        let mut offset: Option<Value> = None;

        while points.len() < limit {
            let page = SCROLL_PAGE.min(limit - points.len());
            let mut body = json!({
                "limit": page,
                "with_payload": true,
                "with_vector": true,
            });
            if let Some(ref o) = offset {
                body["offset"] = o.clone();
            }

            let result: ScrollResult = self
                .send_expect(cancel, Method::POST, url.clone(), Some(body), collection)
                .await?;
            if result.points.is_empty() {
                break;
            }

            for raw in result.points {
                points.push(raw.into_point()?);
            }

            offset = result.next_page_offset.filter(|o| !o.is_null());
            if offset.is_none() {
                break;
            }
        }

        points.truncate(limit);
        Ok(points)
    }

    async fn get_points(
        &self,
        cancel: &CancellationToken,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<Point>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&["collections", collection, "points"])?;
        let body = json!({"ids": ids, "with_payload": true, "with_vector": true});
        let raw: Vec<RawPoint> = self
            .send_expect(cancel, Method::POST, url, Some(body), collection)
            .await?;
        raw.into_iter().map(RawPoint::into_point).collect()
    }
}
