use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use jobs::queue::{JobScheduler, SubmitError};
use quarry_core::error::QuarryError;
use query::engine::{QueryOptions, QueryPipeline};
use query::stream::StreamEvent;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything the handlers need, injected at startup. No globals: the
/// components own their caches and pools.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub query: QueryPipeline,
    pub embedding_info: String,
    pub completion_info: String,
    pub database_info: String,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/rag/index", post(index_document))
        .route("/rag/ask", post(ask_question))
        .route("/rag/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if !cors_origins.is_empty() {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        info!(origins = cors_origins.len(), "CORS enabled");
        router = router.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([axum::http::Method::POST, axum::http::Method::GET])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        );
    }

    router
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub org_id: String,
    pub document_id: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct IndexResponse {
    status: &'static str,
    org_id: String,
    document_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub org_id: String,
    pub message: String,
    #[serde(default)]
    pub options: AskOptions,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AskOptions {
    pub k: Option<usize>,
    #[serde(default)]
    pub fast_mode: bool,
    pub citations: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn from_quarry(err: &dyn QuarryError) -> Self {
        Self {
            status: StatusCode::from_u16(err.error_code().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

/// POST /rag/index — enqueue a document for ingestion. Returns 202 once the
/// job is claimed and queued; progress is observed on the document row.
async fn index_document(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<(StatusCode, Json<IndexResponse>), ApiError> {
    if request.org_id.trim().is_empty() || request.document_id.trim().is_empty() {
        return Err(ApiError::bad_request("org_id and document_id are required"));
    }

    state
        .scheduler
        .submit(
            &request.org_id,
            &request.document_id,
            request.force,
            request.correlation_id,
        )
        .await
        .map_err(|e: SubmitError| ApiError::from_quarry(&e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IndexResponse {
            status: "accepted",
            org_id: request.org_id,
            document_id: request.document_id,
        }),
    ))
}

/// POST /rag/ask — answer a question as a server-sent event stream. Once
/// streaming starts the HTTP status stays 200; failures arrive as `error`
/// events.
async fn ask_question(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.org_id.trim().is_empty() {
        return Err(ApiError::bad_request("org_id is required"));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }

    let defaults = QueryOptions::default();
    let options = QueryOptions {
        k: request.options.k.unwrap_or(defaults.k),
        fast_mode: request.options.fast_mode,
        citations: request.options.citations.unwrap_or(defaults.citations),
        correlation_id: request.correlation_id,
    };

    let events = state
        .query
        .ask(&request.org_id, &request.message, options)
        .map(|event: StreamEvent| {
            let json = serde_json::to_string(&event)
                .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.to_string());
            Ok::<_, Infallible>(Event::default().data(json))
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    providers: HealthProviders,
    database: String,
    jobs: jobs::metrics::MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct HealthProviders {
    embedding: String,
    completion: String,
}

/// GET /rag/health — liveness plus provider identities and scheduler
/// counters for the observability stack.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: VERSION,
        providers: HealthProviders {
            embedding: state.embedding_info.clone(),
            completion: state.completion_info.clone(),
        },
        database: state.database_info.clone(),
        jobs: state.scheduler.metrics(),
    })
}
