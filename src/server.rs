use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::RANGE;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use crate::download::Remuxer;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::progress::{ProgressRecord, ProgressStore, ProgressUpdate};
use crate::providers::{Extractors, Host};
use crate::proxy::Proxy;
use crate::resolver::VideoResolver;
use crate::session::{SessionCache, StreamKind};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<VideoResolver>,
    pub proxy: Arc<Proxy>,
    pub progress: Arc<ProgressStore>,
}

impl AppState {
    pub fn new(
        fetcher: Arc<Fetcher>,
        extractors: Extractors,
        cache: Arc<SessionCache>,
        progress: ProgressStore,
        remuxer: Option<Remuxer>,
        download_concurrency: usize,
    ) -> Self {
        AppState {
            resolver: Arc::new(VideoResolver::new(
                fetcher.clone(),
                extractors,
                cache.clone(),
            )),
            proxy: Arc::new(Proxy::new(fetcher, cache, remuxer, download_concurrency)),
            progress: Arc::new(progress),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/video/info", post(video_info))
        .route("/api/video/stream/{key}", get(video_stream))
        .route("/api/video/segment/{key}/{index}", get(video_segment))
        .route("/api/video/download/{key}", get(video_download))
        .route("/api/progress", post(save_progress))
        .route("/api/progress/{key}", get(load_progress).delete(clear_progress))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
struct InfoRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    success: bool,
    player_type: Host,
    video_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    supports_range: Option<bool>,
}

async fn video_info(
    State(state): State<AppState>,
    body: std::result::Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<InfoResponse>> {
    let Json(request) = body.map_err(|err| Error::InvalidRequest(err.body_text()))?;
    let url = request
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("url is required".into()))?;

    let resolved = state.resolver.resolve(&url).await?;
    let mut response = InfoResponse {
        success: true,
        player_type: resolved.descriptor.host,
        video_key: resolved.session_key,
        segments: None,
        duration: None,
        size: None,
        supports_range: None,
    };
    match &resolved.descriptor.kind {
        StreamKind::Hls(stream) => {
            info!(
                "Resolved {} as HLS under {} ({} segments from {})",
                response.video_key,
                stream.base_url(),
                stream.segments().len(),
                stream.manifest_url()
            );
            response.segments = Some(stream.segments().len());
            response.duration = Some(stream.total_duration());
        }
        StreamKind::Direct(file) => {
            info!(
                "Resolved {} as direct file {}",
                response.video_key, file.resolved_url
            );
            response.size = (file.total_size > 0).then_some(file.total_size);
            response.supports_range = Some(file.supports_ranges);
        }
    }

    Ok(Json(response))
}

async fn video_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let range = headers.get(RANGE).and_then(|value| value.to_str().ok());
    state.proxy.stream(&key, range).await
}

async fn video_segment(
    State(state): State<AppState>,
    Path((key, index)): Path<(String, usize)>,
) -> Result<Response> {
    state.proxy.segment(&key, index).await
}

async fn video_download(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    state.proxy.download(&key).await
}

#[derive(Debug, Deserialize)]
struct SaveProgressRequest {
    #[serde(default)]
    video_key: Option<String>,
    #[serde(flatten)]
    update: ProgressUpdate,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    success: bool,
    progress: Option<ProgressRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume_at: Option<f64>,
}

async fn save_progress(
    State(state): State<AppState>,
    body: std::result::Result<Json<SaveProgressRequest>, JsonRejection>,
) -> Result<Json<ProgressResponse>> {
    let Json(request) = body.map_err(|err| Error::InvalidRequest(err.body_text()))?;
    let key = request
        .video_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("video_key is required".into()))?;

    let record = state.progress.save(&key, request.update).await?;
    Ok(Json(ProgressResponse {
        success: true,
        progress: Some(record),
        resume_at: None,
    }))
}

async fn load_progress(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<ProgressResponse> {
    let progress = state.progress.load(&key);
    let resume_at = progress.as_ref().and_then(ProgressRecord::resume_position);
    Json(ProgressResponse {
        success: true,
        progress,
        resume_at,
    })
}

async fn clear_progress(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let cleared = state.progress.clear(&key).await?;
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}
