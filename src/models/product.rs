//! Represents a catalogue product row, keyed by its natural SKU.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Commercial status of a product.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
    Discontinued,
}

impl ProductStatus {
    /// Parse a CSV status cell. Comparison is case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(ProductStatus::Active),
            "inactive" => Some(ProductStatus::Inactive),
            "discontinued" => Some(ProductStatus::Discontinued),
            _ => None,
        }
    }
}

/// A catalogue product.
///
/// Products own nothing: `primary_image_id` is a weak reference that must
/// tolerate the referent image being deleted out from under it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Product {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Natural unique key.
    pub sku: String,

    pub name: String,

    pub description: Option<String>,

    /// Price in minor units (cents). Non-negative; two-digit scale by
    /// construction.
    pub price_cents: i64,

    /// Units in stock. Non-negative.
    pub stock_quantity: i64,

    pub status: ProductStatus,

    /// Weak reference to the attached primary image, if any.
    pub primary_image_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Price as a two-decimal amount.
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

/// Convert a validated two-decimal price into stored cents.
pub fn price_to_cents(price: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (price * Decimal::from(100))
        .round()
        .to_i64()
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn price_roundtrip() {
        let price = Decimal::from_str("10.00").unwrap();
        assert_eq!(price_to_cents(price), 1000);
        let price = Decimal::from_str("0.99").unwrap();
        assert_eq!(price_to_cents(price), 99);
        let price = Decimal::from_str("19.999").unwrap();
        assert_eq!(price_to_cents(price), 2000);
    }

    #[test]
    fn status_parsing() {
        assert_eq!(ProductStatus::parse("active"), Some(ProductStatus::Active));
        assert_eq!(
            ProductStatus::parse(" Discontinued "),
            Some(ProductStatus::Discontinued)
        );
        assert_eq!(ProductStatus::parse("archived"), None);
    }
}
