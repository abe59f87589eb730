use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use docchat_rag::{RagError, RagPipeline, Upload};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::protocol::{
    ChatRequest, ChatResponse, ErrorBody, StatusResponse, UploadQuery, UploadResponse,
};

/// Default request body limit for uploads.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8090, body_limit: DEFAULT_BODY_LIMIT }
    }
}

impl ServerConfig {
    /// Read `DOCCHAT_HOST`, `DOCCHAT_PORT` and `DOCCHAT_MAX_UPLOAD_BYTES`,
    /// keeping defaults for unset values.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] for an unparsable port or size.
    pub fn from_env() -> Result<Self, RagError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RagError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(host) = get("DOCCHAT_HOST") {
            config.host = host;
        }
        if let Some(port) = get("DOCCHAT_PORT") {
            config.port = port
                .parse()
                .map_err(|e| RagError::Config(format!("invalid DOCCHAT_PORT '{port}': {e}")))?;
        }
        if let Some(limit) = get("DOCCHAT_MAX_UPLOAD_BYTES") {
            config.body_limit = limit.parse().map_err(|e| {
                RagError::Config(format!("invalid DOCCHAT_MAX_UPLOAD_BYTES '{limit}': {e}"))
            })?;
        }
        Ok(config)
    }
}

pub fn app_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/upload", post(upload))
        .route("/api/chat", post(chat))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(config: ServerConfig, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let app = app_router(AppState::new(pipeline), config.body_limit);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for docchat server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docchat listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// A pipeline error rendered as `{"error", "stage"}` with a status per stage.
pub struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::Config(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound { .. } => StatusCode::NOT_FOUND,
            RagError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::Backend { .. } => StatusCode::BAD_GATEWAY,
            RagError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(%status, stage = self.0.stage(), error = %self.0, "request failed");
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../ui/index.html"))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":"docchat"}))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.pipeline.state(),
        collection: state.pipeline.config().collection.clone(),
        last_error: state.pipeline.last_error(),
    })
}

async fn upload(
    State(state): State<AppState>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        RagError::Config(format!("expected ?filename=<name>: {}", rejection.body_text()))
    })?;
    let mut upload = Upload::new(&query.filename, body.to_vec());
    if let Some(mime) = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
        upload = upload.with_mime_hint(mime);
    }

    let report = state.pipeline.ingest(upload).await?;
    Ok(Json(report.into()))
}

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = request.map_err(|rejection| {
        RagError::Config(format!("expected {{\"query\": \"...\"}}: {}", rejection.body_text()))
    })?;
    let answer = state.pipeline.query(&request.query).await?;
    Ok(Json(answer.into()))
}
