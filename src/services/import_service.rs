//! src/services/import_service.rs
//!
//! ImportService — orchestrates CSV parsing, per-row validation, upserts by
//! natural key, image-reference resolution and the ImportLog audit lifecycle.
//! Also serves the import history and statistics queries.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{IngestError, IngestResult};
use crate::models::import_log::{ImportLog, ImportStatus, RowError};
use crate::services::csv_import::{
    csv_reader, ColumnMap, ImportType, ProductImportType, RowOutcome,
};
use crate::services::resolver::Resolver;

/// Closed option set for one import run.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Parse and validate everything, persist nothing.
    pub validate_only: bool,
    /// Keep going past invalid rows; when false the first invalid row aborts
    /// the run and fails the ImportLog.
    pub skip_invalid: bool,
    /// Update products whose SKU already exists; when false they count as
    /// duplicates and are left untouched.
    pub update_existing: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            skip_invalid: true,
            update_existing: true,
        }
    }
}

/// Aggregated outcome of one import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub total: i64,
    pub imported: i64,
    pub updated: i64,
    pub invalid: i64,
    pub duplicates: i64,
    pub processed: i64,
    pub success_rate: f64,
    pub errors: Vec<RowError>,
    pub import_log_id: Option<Uuid>,
}

/// Outcome of the header-only validation pass.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportLogPage {
    pub imports: Vec<ImportLog>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportStatistics {
    pub total_imports: i64,
    pub completed: i64,
    pub failed: i64,
    pub partially_completed: i64,
    pub total_rows: i64,
    pub imported_rows: i64,
    pub updated_rows: i64,
    pub invalid_rows: i64,
    pub duplicate_rows: i64,
    pub avg_processing_time_seconds: Option<f64>,
}

#[derive(Clone)]
pub struct ImportService {
    db: Arc<SqlitePool>,
    resolver: Resolver,
    products: Arc<ProductImportType>,
}

impl ImportService {
    pub fn new(db: Arc<SqlitePool>, resolver: Resolver) -> Self {
        Self {
            db,
            resolver,
            products: Arc::new(ProductImportType),
        }
    }

    pub fn product_columns(&self) -> (&'static [&'static str], &'static [&'static str], &'static str) {
        (
            self.products.required_columns(),
            self.products.optional_columns(),
            self.products.import_type(),
        )
    }

    /// Header-only schema check.
    pub fn validate_schema(&self, bytes: &[u8]) -> IngestResult<SchemaReport> {
        let mut reader = csv_reader(Cursor::new(bytes));
        let headers = reader
            .headers()
            .map_err(|err| IngestError::Malformed(format!("unreadable CSV header: {err}")))?;
        let columns = ColumnMap::from_headers(headers);
        let missing = columns.missing_required(self.products.required_columns());
        Ok(SchemaReport {
            valid: missing.is_empty(),
            missing_columns: missing,
        })
    }

    /// Run a product CSV import.
    pub async fn import_products(
        &self,
        filename: &str,
        bytes: &[u8],
        options: ImportOptions,
    ) -> IngestResult<ImportResult> {
        let products = self.products.clone();
        self.run_import(&*products, filename, bytes, options).await
    }

    /// The generic engine: stream rows of `ty`, upsert by natural key and
    /// keep the ImportLog counters current.
    async fn run_import<T: ImportType>(
        &self,
        ty: &T,
        filename: &str,
        bytes: &[u8],
        options: ImportOptions,
    ) -> IngestResult<ImportResult> {
        let started_at = Utc::now();
        let file_hash = crate::services::checksum::sha256_hex(bytes);

        let mut reader = csv_reader(Cursor::new(bytes));
        let headers = reader
            .headers()
            .map_err(|err| IngestError::Malformed(format!("unreadable CSV header: {err}")))?
            .clone();
        let columns = ColumnMap::from_headers(&headers);
        let missing = columns.missing_required(ty.required_columns());
        if !missing.is_empty() {
            return Err(IngestError::validation_with(
                "CSV is missing required columns",
                missing,
            ));
        }

        let log_id = if options.validate_only {
            None
        } else {
            Some(
                self.create_log(filename, &file_hash, started_at)
                    .await?,
            )
        };

        let mut total: i64 = 0;
        let mut imported: i64 = 0;
        let mut updated: i64 = 0;
        let mut invalid: i64 = 0;
        let mut duplicates: i64 = 0;
        let mut errors: Vec<RowError> = Vec::new();
        let mut aborted = false;

        for (idx, record) in reader.records().enumerate() {
            // 1-based lines plus the header row.
            let row_number = idx as i64 + 2;
            total += 1;

            let row = match record {
                Ok(record) => match ty.validate_row(&record, &columns) {
                    Ok(row) => row,
                    Err(row_errors) => {
                        invalid += 1;
                        errors.push(RowError {
                            row: row_number,
                            errors: row_errors,
                        });
                        if !options.skip_invalid {
                            aborted = true;
                            break;
                        }
                        continue;
                    }
                },
                Err(err) => {
                    invalid += 1;
                    errors.push(RowError {
                        row: row_number,
                        errors: vec![format!("Malformed CSV row: {err}")],
                    });
                    if !options.skip_invalid {
                        aborted = true;
                        break;
                    }
                    continue;
                }
            };

            if options.validate_only {
                imported += 1;
                continue;
            }

            // Any per-row failure is caught and accounted, not propagated.
            match ty.upsert(&self.db, &row, options.update_existing).await {
                Ok(RowOutcome::Created { id }) => {
                    imported += 1;
                    self.maybe_resolve_image(ty, &row, id).await;
                }
                Ok(RowOutcome::Updated { id }) => {
                    updated += 1;
                    self.maybe_resolve_image(ty, &row, id).await;
                }
                Ok(RowOutcome::Duplicate) => {
                    duplicates += 1;
                }
                Err(err) => {
                    invalid += 1;
                    errors.push(RowError {
                        row: row_number,
                        errors: vec![err.to_string()],
                    });
                    if !options.skip_invalid {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        let status = if aborted {
            ImportStatus::Failed
        } else if invalid > 0 {
            ImportStatus::PartiallyCompleted
        } else {
            ImportStatus::Completed
        };

        let completed_at = Utc::now();
        if let Some(log_id) = log_id {
            self.finalize_log(
                log_id,
                status,
                total,
                imported,
                updated,
                invalid,
                duplicates,
                &errors,
                started_at,
                completed_at,
            )
            .await?;
        }

        let processed = imported + updated;
        let success_rate = if total == 0 {
            0.0
        } else {
            let rate = processed as f64 * 100.0 / total as f64;
            (rate * 100.0).round() / 100.0
        };

        info!(
            filename,
            total, imported, updated, invalid, duplicates,
            status = ?status,
            "import finished"
        );

        Ok(ImportResult {
            total,
            imported,
            updated,
            invalid,
            duplicates,
            processed,
            success_rate,
            errors,
            import_log_id: log_id,
        })
    }

    /// Resolve the row's image reference, if present. Resolution failures are
    /// logged and never fail the row.
    async fn maybe_resolve_image<T: ImportType>(&self, ty: &T, row: &T::Row, product_id: Uuid) {
        if let Some(source) = ty.primary_image(row) {
            if let Err(err) = self.resolver.resolve_and_attach(product_id, source).await {
                warn!(product_id = %product_id, source, error = %err, "image resolution failed");
            }
        }
    }

    async fn create_log(
        &self,
        filename: &str,
        file_hash: &str,
        started_at: DateTime<Utc>,
    ) -> IngestResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO import_logs (id, filename, file_hash, status, error_details, created_at)
             VALUES (?, ?, ?, 'pending', '[]', ?)",
        )
        .bind(id)
        .bind(filename)
        .bind(file_hash)
        .bind(started_at)
        .execute(&*self.db)
        .await?;

        sqlx::query("UPDATE import_logs SET status = 'processing', started_at = ? WHERE id = ?")
            .bind(started_at)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_log(
        &self,
        id: Uuid,
        status: ImportStatus,
        total: i64,
        imported: i64,
        updated: i64,
        invalid: i64,
        duplicates: i64,
        errors: &[RowError],
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> IngestResult<()> {
        let elapsed = (completed_at - started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        let details = serde_json::to_string(errors)
            .map_err(|err| IngestError::Internal(err.into()))?;

        sqlx::query(
            "UPDATE import_logs
             SET status = ?, total_rows = ?, imported_rows = ?, updated_rows = ?,
                 invalid_rows = ?, duplicate_rows = ?, error_details = ?,
                 completed_at = ?, processing_time_seconds = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(total)
        .bind(imported)
        .bind(updated)
        .bind(invalid)
        .bind(duplicates)
        .bind(details)
        .bind(completed_at)
        .bind(elapsed)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_log(&self, id: Uuid) -> IngestResult<ImportLog> {
        sqlx::query_as::<_, ImportLog>("SELECT * FROM import_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("import {} not found", id)))
    }

    pub async fn history(&self, page: i64, per_page: i64) -> IngestResult<ImportLogPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_logs")
            .fetch_one(&*self.db)
            .await?;
        let imports = sqlx::query_as::<_, ImportLog>(
            "SELECT * FROM import_logs ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(per_page)
        .bind((page - 1) * per_page)
        .fetch_all(&*self.db)
        .await?;

        Ok(ImportLogPage {
            imports,
            page,
            per_page,
            total,
        })
    }

    pub async fn statistics(&self, days: i64) -> IngestResult<ImportStatistics> {
        let since = Utc::now() - chrono::Duration::days(days.max(1));
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'partially_completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(total_rows), 0),
                    COALESCE(SUM(imported_rows), 0),
                    COALESCE(SUM(updated_rows), 0),
                    COALESCE(SUM(invalid_rows), 0),
                    COALESCE(SUM(duplicate_rows), 0),
                    AVG(processing_time_seconds)
             FROM import_logs WHERE created_at >= ?",
        )
        .bind(since)
        .fetch_one(&*self.db)
        .await?;

        Ok(ImportStatistics {
            total_imports: row.0,
            completed: row.1,
            failed: row.2,
            partially_completed: row.3,
            total_rows: row.4,
            imported_rows: row.5,
            updated_rows: row.6,
            invalid_rows: row.7,
            duplicate_rows: row.8,
            avg_processing_time_seconds: row.9,
        })
    }
}
