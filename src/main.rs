use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::DefaultBodyLimit, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, path::Path};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod jobs;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_utils;

use services::blob_store::BlobStore;
use services::import_service::ImportService;
use services::locks::UploadLocks;
use services::resolver::Resolver;
use services::upload_service::UploadService;
use services::variant_service::VariantService;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting catalog-ingest with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let connect_options =
        SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let blobs = BlobStore::new(cfg.storage_dir.clone());
    let locks = Arc::new(UploadLocks::new());
    let variants = VariantService::new(db.clone(), blobs.clone());
    let uploads = UploadService::new(db.clone(), blobs.clone(), locks, variants.clone());

    let (queue, queue_rx) = jobs::queue();
    let resolver = Resolver::new(db.clone(), uploads.clone(), variants.clone(), queue);
    let imports = ImportService::new(db.clone(), resolver.clone());

    // --- Background worker ---
    let worker = jobs::JobWorker::new(uploads.clone(), variants, resolver);
    tokio::spawn(worker.run(queue_rx));

    let app_state = state::AppState {
        db,
        blobs,
        uploads,
        imports,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_body_bytes()))
        .with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    tracing::info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
