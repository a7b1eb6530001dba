use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Maximum accepted request body in MiB. Must leave headroom for a
    /// base64-encoded 100 MiB chunk, so anything below 128 is rejected.
    pub max_body_mb: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Catalogue ingestion API (chunked uploads + CSV imports)")]
pub struct Args {
    /// Host to bind to (overrides CATALOG_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CATALOG_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides CATALOG_INGEST_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CATALOG_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum request body size in MiB (overrides CATALOG_INGEST_MAX_BODY_MB)
    #[arg(long)]
    pub max_body_mb: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CATALOG_INGEST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CATALOG_INGEST_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CATALOG_INGEST_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading CATALOG_INGEST_PORT"),
        };
        let env_storage =
            env::var("CATALOG_INGEST_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("CATALOG_INGEST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/catalog_ingest.db".into());
        let env_body = match env::var("CATALOG_INGEST_MAX_BODY_MB") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing CATALOG_INGEST_MAX_BODY_MB value `{}`", value))?,
            Err(env::VarError::NotPresent) => 160,
            Err(err) => return Err(err).context("reading CATALOG_INGEST_MAX_BODY_MB"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_body_mb: args.max_body_mb.unwrap_or(env_body),
        };

        if cfg.max_body_mb < 128 {
            anyhow::bail!(
                "max_body_mb must be at least 128 to fit one base64-encoded chunk, got {}",
                cfg.max_body_mb
            );
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb * 1024 * 1024
    }
}
