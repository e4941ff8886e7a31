//! HTTP API server
//!
//! Routes decode JSON bodies or query strings, hand them to the services and
//! shape the responses. Each request runs under a child of the process
//! shutdown token.

mod error;
mod routes;

pub use error::{status_for, ApiError, CLIENT_CLOSED_REQUEST};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::Result;
use crate::graph::GraphService;
use crate::ingest::IngestService;
use crate::jobs::JobService;
use crate::meta::MetadataStore;
use crate::quality::QualityService;
use crate::search::SearchService;
use crate::store::VectorStore;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub search: SearchService,
    pub graph: GraphService,
    pub quality: QualityService,
    pub jobs: JobService,
    pub meta: Arc<dyn MetadataStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services over one embedder and the two stores
    pub fn build(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        meta: Arc<dyn MetadataStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let tuning = &config.tuning;
        let ingest = IngestService::new(
            embedder.clone(),
            vectors.clone(),
            meta.clone(),
            tuning.ingest.clone(),
        );
        let search = SearchService::new(embedder.clone(), vectors.clone(), tuning.search.clone());
        let graph = GraphService::new(
            embedder,
            vectors.clone(),
            tuning.graph.clone(),
            tuning.ingest.default_collection.clone(),
        );
        let quality = QualityService::new(vectors.clone(), tuning.quality.clone());
        let jobs = JobService::new(meta.clone(), ingest.clone());

        Self {
            ingest,
            search,
            graph,
            quality,
            jobs,
            meta,
            vectors,
            shutdown,
        }
    }

    /// Token for one request; cancelled with the process
    pub(crate) fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Answer with a JSON 408 once a handler outlives `budget`
async fn enforce_deadline(State(budget): State<Duration>, req: Request, next: Next) -> Response {
    let uri = req.uri().path().to_string();
    match tokio::time::timeout(budget, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(uri = %uri, budget_ms = budget.as_millis() as u64, "Request deadline exceeded");
            ApiError {
                status: StatusCode::REQUEST_TIMEOUT,
                message: format!("request exceeded the {} ms deadline", budget.as_millis()),
            }
            .into_response()
        }
    }
}

pub fn router(state: AppState, handler_budget: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/v1/knowledge/records/upsert",
            post(routes::upsert_record),
        )
        .route(
            "/api/v1/knowledge/records/{record_id}",
            delete(routes::delete_record),
        )
        .route(
            "/api/v1/knowledge/documents/ingest",
            post(routes::ingest_document),
        )
        .route("/api/v1/knowledge/search", post(routes::search))
        .route(
            "/api/v1/knowledge/graph",
            get(routes::graph_from_query).post(routes::graph_from_body),
        )
        .route("/api/v1/knowledge/health", get(routes::quality))
        .route("/api/v1/knowledge/collections", get(routes::collections))
        .route("/api/v1/ingest/jobs", post(routes::create_job))
        .route("/api/v1/ingest/jobs/{job_id}", get(routes::get_job))
        .layer(middleware::from_fn_with_state(handler_budget, enforce_deadline))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain open connections
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
