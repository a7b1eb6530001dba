//! Audit record summarising one CSV import run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an import run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl ImportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Failed | ImportStatus::PartiallyCompleted
        )
    }
}

/// Validation errors for one rejected CSV row.
///
/// `row` is the 1-based file line number (header is line 1, so the first data
/// row reports as 2).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RowError {
    pub row: i64,
    pub errors: Vec<String>,
}

/// One CSV import run.
///
/// Counter invariant: `imported + updated + invalid + duplicate <= total`,
/// with equality required once the status is terminal.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImportLog {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Name of the imported file as supplied by the client.
    pub filename: String,

    /// SHA-256 of the file bytes, recorded for observability only.
    pub file_hash: Option<String>,

    pub status: ImportStatus,

    pub total_rows: i64,
    pub imported_rows: i64,
    pub updated_rows: i64,
    pub invalid_rows: i64,
    pub duplicate_rows: i64,

    /// Ordered per-row error details.
    pub error_details: Json<Vec<RowError>>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock seconds from `started_at` to `completed_at`.
    pub processing_time_seconds: Option<f64>,

    pub created_at: DateTime<Utc>,
}
