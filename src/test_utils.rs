//! Shared helpers for service-level tests: an in-memory database with the
//! real schema, a temp-dir blob store and small content fixtures.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::jobs::{self, Job};
use crate::services::blob_store::BlobStore;
use crate::services::checksum::sha256_hex;
use crate::services::import_service::ImportService;
use crate::services::locks::UploadLocks;
use crate::services::resolver::Resolver;
use crate::services::upload_service::UploadService;
use crate::services::variant_service::VariantService;

/// In-memory SQLite pool with the production schema applied.
///
/// One connection only: each new `sqlite::memory:` connection would be a
/// fresh empty database.
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    let migration = include_str!("../migrations/0001_init.sql");
    for stmt in migration.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(&pool).await.expect("migration");
    }
    Arc::new(pool)
}

/// Everything a service test needs, wired the way `main` wires it.
pub struct Harness {
    pub db: Arc<SqlitePool>,
    pub blobs: BlobStore,
    pub uploads: UploadService,
    pub resolver: Resolver,
    pub imports: ImportService,
    pub jobs_rx: mpsc::UnboundedReceiver<Job>,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    let db = test_pool().await;
    let dir = TempDir::new().expect("tempdir");
    let blobs = BlobStore::new(dir.path());
    let locks = Arc::new(UploadLocks::new());
    let variants = VariantService::new(db.clone(), blobs.clone());
    let uploads = UploadService::new(db.clone(), blobs.clone(), locks, variants.clone());
    let (queue, jobs_rx) = jobs::queue();
    let resolver = Resolver::new(db.clone(), uploads.clone(), variants, queue);
    let imports = ImportService::new(db.clone(), resolver.clone());

    Harness {
        db,
        blobs,
        uploads,
        resolver,
        imports,
        jobs_rx,
        _dir: dir,
    }
}

pub fn b64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn sha(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

/// A real encoded PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png fixture");
    out
}
