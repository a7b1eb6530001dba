//! Core data models for the catalogue ingestion service.
//!
//! These entities represent uploads, their derived image variants, catalogue
//! products and import audit records. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod image;
pub mod import_log;
pub mod product;
pub mod upload;
