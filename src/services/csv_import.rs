//! CSV schema checking, streaming row decode and per-row validation.
//!
//! The import engine is written against the [`ImportType`] trait so further
//! catalogue import kinds can be added; `ProductImportType` (upsert by SKU)
//! is the one shipped. Unknown CSV columns are tolerated and ignored.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use chrono::Utc;
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::IngestResult;
use crate::models::product::{price_to_cents, ProductStatus};

pub const PRODUCT_REQUIRED_COLUMNS: &[&str] = &["sku", "name", "price", "stock_quantity"];
pub const PRODUCT_OPTIONAL_COLUMNS: &[&str] = &["description", "status", "primary_image"];

/// Build the streaming CSV reader used by validation and import. Fields and
/// headers are trimmed; ragged rows are tolerated and surface as missing
/// fields during validation.
pub fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input)
}

/// Case-insensitive header-name -> column-index map.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    indices: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let indices = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
            .collect();
        Self { indices }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Column names required by `ty` but absent from the header.
    pub fn missing_required(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.contains(name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Fetch a trimmed, non-empty cell for a named column.
    pub fn field<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        let idx = *self.indices.get(name)?;
        record.get(idx).map(str::trim).filter(|s| !s.is_empty())
    }
}

/// What a per-row upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Created { id: Uuid },
    Updated { id: Uuid },
    Duplicate,
}

/// Capability set one import kind must provide: schema, per-row validation
/// and an upsert keyed on the kind's natural key.
#[async_trait]
pub trait ImportType: Send + Sync {
    type Row: Send + Sync;

    fn import_type(&self) -> &'static str;
    fn required_columns(&self) -> &'static [&'static str];
    fn optional_columns(&self) -> &'static [&'static str];

    /// Validate one record. Returns the decoded row or every field error
    /// found in it.
    fn validate_row(
        &self,
        record: &StringRecord,
        columns: &ColumnMap,
    ) -> Result<Self::Row, Vec<String>>;

    /// Image reference carried by the row, if any.
    fn primary_image<'r>(&self, row: &'r Self::Row) -> Option<&'r str>;

    /// Create or update by natural key.
    async fn upsert(
        &self,
        db: &SqlitePool,
        row: &Self::Row,
        update_existing: bool,
    ) -> IngestResult<RowOutcome>;
}

/// A validated product row ready for upsert.
#[derive(Debug, Clone)]
pub struct ProductRow {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i64,
    pub status: ProductStatus,
    pub primary_image: Option<String>,
}

/// Product catalogue import, upserting by SKU.
#[derive(Debug, Clone, Default)]
pub struct ProductImportType;

#[async_trait]
impl ImportType for ProductImportType {
    type Row = ProductRow;

    fn import_type(&self) -> &'static str {
        "products"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        PRODUCT_REQUIRED_COLUMNS
    }

    fn optional_columns(&self) -> &'static [&'static str] {
        PRODUCT_OPTIONAL_COLUMNS
    }

    fn validate_row(
        &self,
        record: &StringRecord,
        columns: &ColumnMap,
    ) -> Result<ProductRow, Vec<String>> {
        let mut errors = Vec::new();

        let sku = columns.field(record, "sku").map(str::to_string);
        if sku.is_none() {
            errors.push("Missing required field: sku".to_string());
        }

        let name = columns.field(record, "name").map(str::to_string);
        if name.is_none() {
            errors.push("Missing required field: name".to_string());
        }

        let price = match columns.field(record, "price") {
            None => {
                errors.push("Missing required field: price".to_string());
                None
            }
            Some(raw) => match raw.parse::<Decimal>() {
                Ok(value) if value.is_sign_negative() => {
                    errors.push("Price cannot be negative".to_string());
                    None
                }
                Ok(value) => Some(value.round_dp(2)),
                Err(_) => {
                    errors.push("Invalid price format".to_string());
                    None
                }
            },
        };

        let stock_quantity = match columns.field(record, "stock_quantity") {
            None => {
                errors.push("Missing required field: stock_quantity".to_string());
                None
            }
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if value < 0 => {
                    errors.push("Stock quantity cannot be negative".to_string());
                    None
                }
                Ok(value) => Some(value),
                Err(_) => {
                    errors.push("Invalid stock quantity".to_string());
                    None
                }
            },
        };

        let status = match columns.field(record, "status") {
            None => ProductStatus::Active,
            Some(raw) => match ProductStatus::parse(raw) {
                Some(status) => status,
                None => {
                    errors.push("Invalid status value".to_string());
                    ProductStatus::Active
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ProductRow {
            sku: sku.unwrap(),
            name: name.unwrap(),
            description: columns.field(record, "description").map(str::to_string),
            price: price.unwrap(),
            stock_quantity: stock_quantity.unwrap(),
            status,
            primary_image: columns.field(record, "primary_image").map(str::to_string),
        })
    }

    fn primary_image<'r>(&self, row: &'r ProductRow) -> Option<&'r str> {
        row.primary_image.as_deref()
    }

    async fn upsert(
        &self,
        db: &SqlitePool,
        row: &ProductRow,
        update_existing: bool,
    ) -> IngestResult<RowOutcome> {
        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE sku = ?")
            .bind(&row.sku)
            .fetch_optional(db)
            .await?;

        let now = Utc::now();
        match existing {
            Some(id) if update_existing => {
                sqlx::query(
                    "UPDATE products
                     SET name = ?, description = ?, price_cents = ?, stock_quantity = ?,
                         status = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&row.name)
                .bind(&row.description)
                .bind(price_to_cents(row.price))
                .bind(row.stock_quantity)
                .bind(row.status)
                .bind(now)
                .bind(id)
                .execute(db)
                .await?;
                Ok(RowOutcome::Updated { id })
            }
            Some(_) => Ok(RowOutcome::Duplicate),
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO products (id, sku, name, description, price_cents,
                                           stock_quantity, status, primary_image_id,
                                           created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
                )
                .bind(id)
                .bind(&row.sku)
                .bind(&row.name)
                .bind(&row.description)
                .bind(price_to_cents(row.price))
                .bind(row.stock_quantity)
                .bind(row.status)
                .bind(now)
                .bind(now)
                .execute(db)
                .await?;
                Ok(RowOutcome::Created { id })
            }
        }
    }
}
