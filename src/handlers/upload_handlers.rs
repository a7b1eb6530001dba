//! HTTP handlers for the chunked upload engine.
//! Decode request bodies and delegate every decision to `UploadService`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::handlers::{ok, ok_with_message};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub original_filename: String,
    pub total_chunks: i64,
    pub total_size: i64,
    pub checksum_sha256: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// POST `/uploads/initialize`
pub async fn initialize(
    State(state): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> Result<impl IntoResponse, IngestError> {
    let upload = state
        .uploads
        .initialize(
            &req.original_filename,
            req.total_chunks,
            req.total_size,
            &req.checksum_sha256,
            req.mime_type,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        ok(json!({
            "upload_id": upload.id,
            "status": upload.status,
            "total_chunks": upload.total_chunks,
            "uploaded_chunks": upload.uploaded_chunks,
        })),
    ))
}

/// Chunk payloads carry redundant session fields (`total_chunks`,
/// `original_filename`, sizes); they are accepted and ignored, the session
/// row is authoritative.
#[derive(Debug, Deserialize)]
pub struct ChunkRequest {
    pub upload_id: Uuid,
    pub chunk_index: i64,
    pub chunk_data: String,
    pub checksum: String,
    #[serde(default)]
    pub total_chunks: Option<i64>,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<i64>,
    #[serde(default)]
    pub total_size: Option<i64>,
}

/// POST `/uploads/chunk`
pub async fn receive_chunk(
    State(state): State<AppState>,
    Json(req): Json<ChunkRequest>,
) -> Result<impl IntoResponse, IngestError> {
    let receipt = state
        .uploads
        .receive_chunk(req.upload_id, req.chunk_index, &req.chunk_data, &req.checksum)
        .await?;
    Ok(ok(receipt))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    #[serde(default = "default_generate_variants")]
    pub generate_variants: bool,
}

fn default_generate_variants() -> bool {
    true
}

impl Default for CompleteRequest {
    fn default() -> Self {
        Self {
            generate_variants: true,
        }
    }
}

/// POST `/uploads/{id}/complete` — body is optional.
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CompleteRequest>>,
) -> Result<impl IntoResponse, IngestError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state.uploads.complete(id, req.generate_variants).await?;

    Ok(ok(json!({
        "upload_id": outcome.upload.id,
        "status": outcome.upload.status,
        "completed_at": outcome.upload.completed_at,
        "images": outcome.images,
    })))
}

/// GET `/uploads/{id}/status`
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngestError> {
    Ok(ok(state.uploads.status(id).await?))
}

/// GET `/uploads/{id}/resume`
pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngestError> {
    Ok(ok(state.uploads.resume(id).await?))
}

/// GET `/uploads/{id}/verify`
pub async fn verify(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngestError> {
    let valid = state.uploads.verify_checksum(id).await?;
    Ok(ok(json!({ "checksum_valid": valid })))
}

/// DELETE `/uploads/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngestError> {
    let cancelled = state.uploads.cancel(id).await?;
    let message = if cancelled {
        "upload cancelled"
    } else {
        "upload not cancellable"
    };
    Ok(ok_with_message(message, json!({ "cancelled": cancelled })))
}
