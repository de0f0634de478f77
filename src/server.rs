//! HTTP interface
//!
//! Uploads arrive as multipart forms; every query is a GET keyed by the
//! session token. Errors are returned as `{"error": "..."}` with a status
//! code chosen from the error kind.

use crate::config::ServerConfig;
use crate::error::{ExplorerError, Result};
use crate::export::{csv_filename, csv_stream};
use crate::graphs::GraphCatalog;
use crate::parser::{DataFlashDecoder, LogDecoder};
use crate::query;
use crate::session::{AnalysisSession, SessionCache};
use crate::upload::{ChunkMetadata, ChunkReceiver, ChunkRequest, ChunkResponse, Encoding, FinalResult};
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    receiver: Arc<ChunkReceiver>,
    sessions: Arc<SessionCache>,
    catalog: Arc<GraphCatalog>,
    body_limit: usize,
    started: Instant,
}

impl AppState {
    pub fn new(config: &ServerConfig, catalog: GraphCatalog) -> Self {
        Self::with_decoder(config, catalog, Arc::new(DataFlashDecoder::new()))
    }

    pub fn with_decoder(
        config: &ServerConfig,
        catalog: GraphCatalog,
        decoder: Arc<dyn LogDecoder>,
    ) -> Self {
        let sessions = Arc::new(SessionCache::new(decoder, config.max_sessions));
        let receiver = Arc::new(ChunkReceiver::new(
            config.upload_limits(),
            Arc::clone(&sessions),
        ));
        Self {
            receiver,
            sessions,
            catalog: Arc::new(catalog),
            body_limit: config.body_limit(),
            started: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    fn session(&self, token: Option<&str>) -> Result<Arc<AnalysisSession>> {
        let token = required_param("token", token)?;
        self.sessions.get_session(token)
    }
}

pub fn router(state: AppState) -> Router {
    let uploads = Router::new()
        .route("/upload_chunk", post(upload_chunk))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.body_limit));

    Router::new()
        .route("/timeseries", get(timeseries))
        .route("/graph", get(graph))
        .route("/graphs", get(graphs))
        .route("/flight_modes", get(flight_modes))
        .route("/stats", get(stats))
        .route("/params", get(params))
        .route("/dump", get(dump))
        .route("/messages", get(messages))
        .route("/download", get(download))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .merge(uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: ServerConfig, catalog: GraphCatalog) -> Result<()> {
    let state = AppState::new(&config, catalog);
    let listener = TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, graphs = state.catalog.len(), "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

impl IntoResponse for ExplorerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ExplorerError::MalformedChunk(_)
            | ExplorerError::MissingParameter(_)
            | ExplorerError::InvalidParameter(_)
            | ExplorerError::Parse(_) => StatusCode::BAD_REQUEST,
            ExplorerError::UploadConflict(_) => StatusCode::CONFLICT,
            ExplorerError::TooLarge { .. } | ExplorerError::RequestTooLarge(_) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            err if err.is_terminal_upload_failure() => StatusCode::UNPROCESSABLE_ENTITY,
            ExplorerError::UnknownToken
            | ExplorerError::UnknownGraph(_)
            | ExplorerError::UnknownMessage(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn required_param<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ExplorerError::MissingParameter(name.to_string()))
}

/// Parse an optional numeric query parameter; empty counts as absent
fn optional_param<T: FromStr>(name: &str, value: Option<&str>) -> Result<Option<T>> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| ExplorerError::InvalidParameter(format!("{}: '{}'", name, v)))
        })
        .transpose()
}

fn multipart_error(err: MultipartError) -> ExplorerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ExplorerError::RequestTooLarge(err.body_text())
    } else {
        ExplorerError::MalformedChunk(err.body_text())
    }
}

/// Text fields and the file part of a multipart form
struct UploadForm {
    fields: HashMap<String, String>,
    file: Option<Vec<u8>>,
    file_name: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = UploadForm {
            fields: HashMap::new(),
            file: None,
            file_name: None,
        };
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" || name == "chunk" {
                form.file_name = field.file_name().map(str::to_string);
                form.file = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required<T: FromStr>(&self, name: &str) -> Result<T> {
        self.optional(name)?
            .ok_or_else(|| ExplorerError::MalformedChunk(format!("{} is required", name)))
    }

    fn optional<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.text(name)
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    ExplorerError::MalformedChunk(format!("invalid {}: '{}'", name, v))
                })
            })
            .transpose()
    }

    fn into_chunk_request(self) -> Result<ChunkRequest> {
        let metadata = ChunkMetadata {
            original_filename: self
                .text("original_filename")
                .map(str::to_string)
                .or_else(|| self.file_name.clone()),
            original_size: self.optional("original_size")?,
            total_size: self.optional("total_size")?,
            encoding: self.optional::<Encoding>("encoding")?.unwrap_or_default(),
        };
        let upload_id: String = self.required("upload_id")?;
        let chunk_index = self.required("chunk_index")?;
        let total_chunks = self.required("total_chunks")?;
        let payload = self
            .file
            .ok_or_else(|| ExplorerError::MalformedChunk("file is required".to_string()))?;
        Ok(ChunkRequest::new(
            upload_id,
            chunk_index,
            total_chunks,
            payload,
            metadata,
        ))
    }
}

async fn upload_chunk(State(state): State<AppState>, multipart: Multipart) -> Result<Response> {
    let request = UploadForm::read(multipart).await?.into_chunk_request()?;
    let receiver = Arc::clone(&state.receiver);
    let response = tokio::task::spawn_blocking(move || receiver.receive_chunk(request))
        .await
        .map_err(|e| ExplorerError::Internal(e.to_string()))??;
    Ok(match response {
        ChunkResponse::Ack(ack) => Json(ack).into_response(),
        ChunkResponse::Final(result) => Json(result).into_response(),
    })
}

/// Single-request upload of an uncompressed log
async fn analyze(State(state): State<AppState>, multipart: Multipart) -> Result<Json<FinalResult>> {
    let form = UploadForm::read(multipart).await?;
    let file_name = form.file_name.clone();
    let raw = form
        .file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ExplorerError::MissingParameter("file".to_string()))?;
    let sessions = Arc::clone(&state.sessions);
    let session = tokio::task::spawn_blocking(move || sessions.create_session(&raw, file_name))
        .await
        .map_err(|e| ExplorerError::Internal(e.to_string()))??;
    Ok(Json(FinalResult {
        token: session.token.clone(),
        analysis: session.summary(),
    }))
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeseriesParams {
    token: Option<String>,
    msg: Option<String>,
    field: Option<String>,
    decimate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphParams {
    token: Option<String>,
    name: Option<String>,
    decimate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DumpParams {
    token: Option<String>,
    #[serde(rename = "type")]
    msg_type: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    token: Option<String>,
    msg: Option<String>,
}

async fn timeseries(
    State(state): State<AppState>,
    Query(params): Query<TimeseriesParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    let msg = required_param("msg", params.msg.as_deref())?;
    let field = required_param("field", params.field.as_deref())?;
    let step: usize = optional_param("decimate", params.decimate.as_deref())?.unwrap_or(1);
    let series = query::timeseries(&session, msg, field, step);
    Ok(Json(json!({ "msg": msg, "field": field, "series": series })))
}

async fn graph(
    State(state): State<AppState>,
    Query(params): Query<GraphParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    let name = required_param("name", params.name.as_deref())?;
    let step: usize = optional_param("decimate", params.decimate.as_deref())?.unwrap_or(1);
    let definition = state.catalog.get(name)?;
    let result = query::evaluate_graph(&session, definition, step);

    let mut series = Map::new();
    for named in result.series {
        series.insert(named.expression, json!(named.points));
    }
    Ok(Json(json!({
        "name": result.name,
        "description": result.description,
        "series": series,
    })))
}

async fn graphs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "graphs": state.catalog.graphs() }))
}

async fn flight_modes(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    Ok(Json(json!({ "modes": query::flight_modes(&session) })))
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    Ok(Json(json!(query::stats(&session))))
}

async fn params(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    let values = query::params(&session);
    Ok(Json(json!({ "count": values.len(), "params": values })))
}

async fn dump(
    State(state): State<AppState>,
    Query(params): Query<DumpParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    let msg_type = required_param("type", params.msg_type.as_deref())?;
    let limit = optional_param("limit", params.limit.as_deref())?.unwrap_or(query::DEFAULT_DUMP_LIMIT);
    let messages = query::dump(&session, msg_type, limit);
    Ok(Json(json!({
        "type": msg_type,
        "count": messages.len(),
        "messages": messages,
    })))
}

async fn messages(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>> {
    let session = state.session(params.token.as_deref())?;
    Ok(Json(json!(query::messages(&session))))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response> {
    let session = state.session(params.token.as_deref())?;
    let msg = required_param("msg", params.msg.as_deref())?;
    let export = csv_stream(session, msg)?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", csv_filename(msg)))
        .map_err(|e| ExplorerError::Internal(e.to_string()))?;
    let body = Body::from_stream(futures_util::stream::iter(export));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": option_env!("VERGEN_GIT_SHA"),
        "git_commit_date": option_env!("VERGEN_GIT_COMMIT_DATE"),
        "uptime_seconds": state.started.elapsed().as_secs(),
        "sessions": state.sessions.len(),
        "uploads_in_flight": state.receiver.registry().in_flight(),
        "graphs": state.catalog.len(),
    }))
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
