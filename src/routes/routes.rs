//! Defines routes for the upload and import engines.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST   /uploads/initialize`    — start (or deduplicate) a session
//!   - `POST   /uploads/chunk`         — receive one base64 chunk
//!   - `POST   /uploads/{id}/complete` — assemble and verify
//!   - `GET    /uploads/{id}/status`   — progress snapshot
//!   - `GET    /uploads/{id}/resume`   — uploaded/missing chunk sets
//!   - `GET    /uploads/{id}/verify`   — re-hash the assembled blob
//!   - `DELETE /uploads/{id}/cancel`   — abort and clean up chunks
//!
//! - **Import endpoints**
//!   - `POST /imports/products`          — run a CSV import (multipart)
//!   - `POST /imports/products/validate` — header-only schema check
//!   - `GET  /imports/products/columns`  — accepted column set
//!   - `GET  /imports/history`           — paginated ImportLogs
//!   - `GET  /imports/statistics`        — aggregates over a trailing window
//!   - `GET  /imports/{id}`              — one ImportLog with its summary

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        import_handlers::{
            get_import, history, import_products, product_columns, statistics, validate_products,
        },
        upload_handlers::{cancel, complete, initialize, receive_chunk, resume, status, verify},
    },
    state::AppState,
};
use axum::{
    routing::{delete, get, post},
    Router,
};

/// Build and return the router for all upload and import routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Upload engine
        .route("/uploads/initialize", post(initialize))
        .route("/uploads/chunk", post(receive_chunk))
        .route("/uploads/{id}/complete", post(complete))
        .route("/uploads/{id}/status", get(status))
        .route("/uploads/{id}/resume", get(resume))
        .route("/uploads/{id}/verify", get(verify))
        .route("/uploads/{id}/cancel", delete(cancel))
        // Import engine
        .route("/imports/products", post(import_products))
        .route("/imports/products/validate", post(validate_products))
        .route("/imports/products/columns", get(product_columns))
        .route("/imports/history", get(history))
        .route("/imports/statistics", get(statistics))
        .route("/imports/{id}", get(get_import))
}
