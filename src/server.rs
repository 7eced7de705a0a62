use crate::batch::BatchQueueProcessor;
use crate::common::error::ResolveError;
use crate::common::types::Job;
use crate::observability::metrics;
use crate::pipeline::ResolutionPipeline;
use crate::tasks::{resolve_one, ResolveOneParams};
use axum::{
    extract::Path,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared handles for the request handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ResolutionPipeline>,
    pub batches: BatchQueueProcessor,
}

/// A batch entry is either a bare identifier or an identifier with hints
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    Plain(String),
    Detailed {
        identifier: String,
        outward: Option<String>,
        inward: Option<String>,
    },
}

impl BatchItem {
    fn into_job(self) -> Result<Job, ResolveError> {
        match self {
            BatchItem::Plain(identifier) => Job::parse(&identifier, None, None),
            BatchItem::Detailed {
                identifier,
                outward,
                inward,
            } => Job::parse(&identifier, outward.as_deref(), inward.as_deref()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    pub identifiers: Vec<BatchItem>,
    pub chunk_size: Option<usize>,
}

fn error_response(e: ResolveError) -> Response {
    let status = match e {
        ResolveError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "address_resolver",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn resolve(Extension(state): Extension<AppState>, Json(params): Json<ResolveOneParams>) -> Response {
    match resolve_one(&state.pipeline, params).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn submit_batch(Extension(state): Extension<AppState>, Json(req): Json<SubmitBatchRequest>) -> Response {
    let jobs = match req
        .identifiers
        .into_iter()
        .map(BatchItem::into_job)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(jobs) => jobs,
        Err(e) => return error_response(e),
    };
    match state.batches.enqueue(jobs, req.chunk_size).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn batch_progress(Extension(state): Extension<AppState>, Path(job_id): Path<String>) -> Response {
    match state.batches.progress(&job_id).await {
        Ok(Some(progress)) => Json(progress).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("batch {} not found", job_id) })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn batch_results(Extension(state): Extension<AppState>, Path(job_id): Path<String>) -> Response {
    match state.batches.results(&job_id).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(e),
    }
}

async fn prometheus() -> Response {
    match metrics::render() {
        Some(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Build the router with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/resolve", post(resolve))
        .route("/batches", post(submit_batch))
        .route("/batches/:job_id", get(batch_progress))
        .route("/batches/:job_id/results", get(batch_results))
        .route("/metrics", get(prometheus))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Serve until ctrl-c
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "HTTP server listening");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
