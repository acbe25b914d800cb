//! API Routes

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};
use crate::frame_hub::{multipart_part, BOUNDARY};
use crate::image_codec;
use crate::models::SnapshotKind;
use crate::snapshot_store::{DownloadFormat, GalleryItem};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Monitoring
        .route("/start", post(start_monitoring))
        .route("/stop", post(stop_monitoring))
        .route("/status", get(get_status))
        .route("/video_feed", get(video_feed))
        .route("/cameras", get(list_cameras))
        // Sensors
        .route("/sensor_live", get(sensor_live))
        // Gallery
        .route("/snaps", get(list_snaps))
        .route("/snap_image/:kind/:id", get(snap_image))
        .route("/download/:kind/:id", get(download_snap))
        .route("/snap/:kind/:id", delete(delete_snap))
        // Single-image test
        .route("/upload_test", post(upload_test))
        .with_state(state)
}

// ========================================
// Monitoring
// ========================================

#[derive(Debug, Deserialize)]
struct StartRequest {
    camera_index: Option<i64>,
}

async fn start_monitoring(
    State(state): State<AppState>,
    body: std::result::Result<Json<StartRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body.map_err(|e| Error::Validation(e.body_text()))?;

    let camera_index = req
        .camera_index
        .ok_or_else(|| Error::Validation("camera_index is required".to_string()))?;
    let camera_index = u32::try_from(camera_index)
        .map_err(|_| Error::Validation(format!("Invalid camera_index: {}", camera_index)))?;

    let outcome = state.controller.start(camera_index).await?;
    Ok(Json(outcome))
}

async fn stop_monitoring(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.stop().await;
    Json(json!({"status": "stopped"}))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

/// MJPEG stream of the active session
async fn video_feed(State(state): State<AppState>) -> Result<Response> {
    let rx = state.controller.subscribe().await?;

    let stream = ReceiverStream::new(rx).map(|jpeg| Ok::<_, Infallible>(multipart_part(&jpeg)));

    let response = axum::http::Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(response)
}

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    let cameras = state.camera_opener.probe().await;
    Json(json!({ "cameras": cameras }))
}

// ========================================
// Sensors
// ========================================

async fn sensor_live(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sensor_reader.read_latest().await.unwrap_or_default())
}

// ========================================
// Gallery
// ========================================

#[derive(Debug, Deserialize)]
struct SnapsQuery {
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    fmt: Option<String>,
}

async fn list_snaps(
    State(state): State<AppState>,
    Query(query): Query<SnapsQuery>,
) -> Result<impl IntoResponse> {
    let kind: SnapshotKind = query
        .kind
        .as_deref()
        .ok_or_else(|| Error::Validation("kind is required".to_string()))?
        .parse()?;

    let items: Vec<GalleryItem> = state
        .snapshot_store
        .list(kind)
        .await?
        .into_iter()
        .map(GalleryItem::from)
        .collect();

    Ok(Json(json!({ "items": items })))
}

async fn snap_image(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let kind: SnapshotKind = kind.parse()?;
    let bytes = state
        .snapshot_store
        .render(kind, &id, DownloadFormat::Jpg)
        .await?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

async fn download_snap(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse> {
    let kind: SnapshotKind = kind.parse()?;
    let format = DownloadFormat::parse(query.fmt.as_deref());
    let bytes = state.snapshot_store.render(kind, &id, format).await?;

    let disposition = format!(
        "attachment; filename=\"snapshot_{}.{}\"",
        id,
        format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

async fn delete_snap(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let kind: SnapshotKind = kind.parse()?;
    state.snapshot_store.delete(kind, &id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

// ========================================
// Single-image test
// ========================================

async fn upload_test(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(e.body_text()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(e.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload.ok_or_else(|| Error::Validation("file field is required".to_string()))?;
    let frame = image_codec::decode_rgb(&bytes)
        .map_err(|e| Error::Validation(format!("Unreadable image: {}", e)))?;

    let outcome = state.pipeline.run_once(&frame, None).await?;

    tracing::info!(
        label = %outcome.label,
        confidence = ?outcome.confidence,
        persisted = outcome.persisted,
        "Upload classified"
    );

    Ok(Json(json!({
        "label": outcome.label,
        "confidence": outcome.confidence,
    })))
}
