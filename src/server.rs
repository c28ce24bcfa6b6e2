//! HTTP service.
//!
//! Wraps a started [`SearchEngine`] in an axum router. `POST /search` takes the
//! raw image as the request body; the `/search-image*` routes accept a
//! multipart `file` upload and pin a fixed backend pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::catalog::types::Product;
use crate::config::ImsearchConfig;
use crate::embedding::EmbedderKind;
use crate::error::{EmbedError, ReasonCode, SearchError};
use crate::index::IndexKind;
use crate::search::{BackendSelector, RankedProducts, SearchEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub upload_dir: Option<PathBuf>,
}

/// JSON error body: `{"reason": "...", "message": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub reason: ReasonCode,
    pub message: String,
}

pub struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.reason() {
            ReasonCode::InvalidInput | ReasonCode::InvalidTopK => StatusCode::BAD_REQUEST,
            ReasonCode::CatalogNotFound => StatusCode::NOT_FOUND,
            ReasonCode::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ReasonCode::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(reason = %self.0.reason(), error = %self.0, "request failed");
        } else {
            tracing::debug!(reason = %self.0.reason(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            reason: self.0.reason(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_input(message: impl Into<String>) -> ApiError {
    ApiError(SearchError::InvalidInput(EmbedError::Input(message.into())))
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/search", post(search))
        .route("/search-image", post(search_image))
        .route("/search-image-triton", post(search_image_triton))
        .route("/search-image-faiss", post(search_image_faiss))
        .route("/admin/reload-index", post(reload_index))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn health() -> Json<bool> {
    Json(true)
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub top_k: Option<i64>,
    pub embedder: Option<String>,
    pub index: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    body: Bytes,
) -> Result<Json<RankedProducts>, ApiError> {
    let mut selector = state.engine.default_selector();
    if let Some(name) = params.embedder.as_deref() {
        selector.embedder = name
            .parse::<EmbedderKind>()
            .map_err(bad_input)?;
    }
    if let Some(name) = params.index.as_deref() {
        selector.index = name
            .parse::<IndexKind>()
            .map_err(bad_input)?;
    }
    let top_k = params
        .top_k
        .unwrap_or(state.engine.default_top_k() as i64);

    save_upload(state.upload_dir.as_deref(), &body).await;
    let ranked = state.engine.search(&body, top_k, selector).await?;
    Ok(Json(ranked))
}

async fn search_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<Product>>, ApiError> {
    fixed_search(state, multipart, EmbedderKind::Local, IndexKind::Remote).await
}

async fn search_image_triton(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<Product>>, ApiError> {
    fixed_search(state, multipart, EmbedderKind::Remote, IndexKind::Remote).await
}

async fn search_image_faiss(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<Product>>, ApiError> {
    fixed_search(state, multipart, EmbedderKind::Local, IndexKind::Local).await
}

async fn fixed_search(
    state: AppState,
    mut multipart: Multipart,
    embedder: EmbedderKind,
    index: IndexKind,
) -> Result<Json<Vec<Product>>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_input(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_input(format!("failed to read upload: {e}")))?;
            image = Some(bytes);
            break;
        }
    }
    let image = image.ok_or_else(|| bad_input("missing multipart field 'file'"))?;

    save_upload(state.upload_dir.as_deref(), &image).await;
    let ranked = state
        .engine
        .search(
            &image,
            state.engine.default_top_k() as i64,
            BackendSelector { embedder, index },
        )
        .await?;
    Ok(Json(ranked.products))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub entries: usize,
}

async fn reload_index(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let entries = tokio::task::spawn_blocking(move || engine.reload_local_index())
        .await
        .map_err(|e| ApiError(SearchError::BackendUnavailable(format!("reload task failed: {e}"))))??;
    Ok(Json(ReloadResponse { entries }))
}

/// Name for a persisted upload: `20240131-093000-<uuid>.img`.
pub fn upload_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("{}-{}.img", now.format("%Y%m%d-%H%M%S"), uuid::Uuid::now_v7())
}

/// Persist the raw upload when an upload directory is configured. Failures
/// are logged and never fail the request.
async fn save_upload(dir: Option<&Path>, bytes: &[u8]) {
    let Some(dir) = dir else { return };
    if bytes.is_empty() {
        return;
    }
    let path = dir.join(upload_file_name(chrono::Local::now()));
    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, bytes).await
    }
    .await;
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), bytes = bytes.len(), "upload saved"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save upload"),
    }
}

/// Start the engine and serve HTTP until ctrl-c.
pub async fn serve(config: ImsearchConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting imsearch HTTP service");

    let engine = Arc::new(SearchEngine::start(&config).await?);
    let state = AppState {
        engine: Arc::clone(&engine),
        upload_dir: config.resolved_upload_dir(),
    };
    let app = router(state, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening at http://{bind_addr}/");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP service");
        })
        .await?;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown(),
        Err(_) => tracing::warn!("search engine still referenced at shutdown"),
    }
    Ok(())
}
