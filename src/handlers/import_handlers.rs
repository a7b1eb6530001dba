//! HTTP handlers for the CSV import engine.
//!
//! The import endpoints take `multipart/form-data` with a `file` part and an
//! optional `options` part carrying the JSON-encoded [`ImportOptions`].

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::handlers::ok;
use crate::services::import_service::ImportOptions;
use crate::state::AppState;

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

/// Pull the `file` and `options` parts out of a multipart body.
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(UploadedFile, ImportOptions), IngestError> {
    let mut file: Option<UploadedFile> = None;
    let mut options = ImportOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| IngestError::Malformed(format!("unreadable multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("import.csv")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| IngestError::Malformed(format!("unreadable file part: {err}")))?;
                file = Some(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            Some("options") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| IngestError::Malformed(format!("unreadable options part: {err}")))?;
                if !raw.trim().is_empty() {
                    options = serde_json::from_str(&raw).map_err(|err| {
                        IngestError::Malformed(format!("options is not valid JSON: {err}"))
                    })?;
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| IngestError::Malformed("missing `file` part".into()))?;
    Ok((file, options))
}

/// POST `/imports/products`
pub async fn import_products(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, IngestError> {
    let (file, options) = read_multipart(multipart).await?;
    let result = state
        .imports
        .import_products(&file.filename, &file.bytes, options)
        .await?;
    Ok(ok(result))
}

/// POST `/imports/products/validate` — header-only schema check.
/// Responds 200 when the schema is importable, 422 otherwise.
pub async fn validate_products(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, IngestError> {
    let (file, _) = read_multipart(multipart).await?;
    let report = state.imports.validate_schema(&file.bytes)?;

    if report.valid {
        Ok((StatusCode::OK, ok(json!({ "valid": true }))).into_response())
    } else {
        let body = Json(json!({
            "success": false,
            "message": "CSV is missing required columns",
            "data": { "valid": false, "errors": report.missing_columns },
        }));
        Ok((StatusCode::UNPROCESSABLE_ENTITY, body).into_response())
    }
}

/// GET `/imports/products/columns`
pub async fn product_columns(State(state): State<AppState>) -> impl IntoResponse {
    let (required, optional, import_type) = state.imports.product_columns();
    let columns: Vec<&str> = required.iter().chain(optional.iter()).copied().collect();
    ok(json!({
        "columns": columns,
        "required_columns": required,
        "optional_columns": optional,
        "import_type": import_type,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

/// GET `/imports/history`
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, IngestError> {
    Ok(ok(state.imports.history(query.page, query.per_page).await?))
}

/// GET `/imports/{id}`
pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, IngestError> {
    let log = state.imports.get_log(id).await?;
    let processed = log.imported_rows + log.updated_rows;
    let success_rate = if log.total_rows == 0 {
        0.0
    } else {
        let rate = processed as f64 * 100.0 / log.total_rows as f64;
        (rate * 100.0).round() / 100.0
    };

    Ok(ok(json!({
        "import": log,
        "summary": {
            "processed": processed,
            "success_rate": success_rate,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// GET `/imports/statistics`
pub async fn statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> Result<impl IntoResponse, IngestError> {
    let days = query.days.max(1);
    let stats = state.imports.statistics(days).await?;
    let to = Utc::now();
    let from = to - chrono::Duration::days(days);

    Ok(ok(json!({
        "statistics": stats,
        "period": { "from": from, "to": to },
    })))
}
