//! Shared application state handed to every handler.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::blob_store::BlobStore;
use crate::services::import_service::ImportService;
use crate::services::upload_service::UploadService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub blobs: BlobStore,
    pub uploads: UploadService,
    pub imports: ImportService,
}
