//! HTTP handlers, grouped by resource.
//!
//! Handlers stay thin: decode the request, delegate to a service, wrap the
//! outcome in the common `{success, data}` envelope.

pub mod health_handlers;
pub mod import_handlers;
pub mod upload_handlers;

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Success envelope.
pub(crate) fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Success envelope with a human-readable message.
pub(crate) fn ok_with_message<T: Serialize>(message: &str, data: T) -> Json<Value> {
    Json(json!({ "success": true, "message": message, "data": data }))
}
