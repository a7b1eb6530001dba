//! Image-reference resolution for CSV imports.
//!
//! A `primary_image` cell can name an already-ingested image, a completed
//! upload, a local filesystem path, or a remote URL. The pipeline tries each
//! interpretation in that order and attaches the first hit to the product;
//! remote sources are handed to the background fetch job and attach later.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{IngestError, IngestResult};
use crate::jobs::{Job, JobQueue};
use crate::models::upload::{Upload, UploadStatus};
use crate::services::checksum;
use crate::services::upload_service::UploadService;
use crate::services::variant_service::{guess_mime, VariantService};

/// Chunk size used when the resolver feeds a file through the upload engine
/// itself.
const INGEST_CHUNK_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct Resolver {
    db: Arc<SqlitePool>,
    uploads: UploadService,
    variants: VariantService,
    jobs: JobQueue,
}

impl Resolver {
    pub fn new(
        db: Arc<SqlitePool>,
        uploads: UploadService,
        variants: VariantService,
        jobs: JobQueue,
    ) -> Self {
        Self {
            db,
            uploads,
            variants,
            jobs,
        }
    }

    /// Resolve a `primary_image` source and attach the resulting image to the
    /// product. Returns the attached image id, or `None` when resolution was
    /// deferred to a background job or found nothing.
    pub async fn resolve_and_attach(
        &self,
        product_id: Uuid,
        source: &str,
    ) -> IngestResult<Option<Uuid>> {
        let source = source.trim();
        if source.is_empty() {
            return Ok(None);
        }

        // 1. An original image we already know about.
        if let Some(image_id) = self.lookup_existing_image(source).await? {
            self.attach_primary_image(product_id, image_id).await?;
            return Ok(Some(image_id));
        }

        // 2. A completed upload without image records yet.
        if let Some(image_id) = self.lookup_completed_upload(source).await? {
            self.attach_primary_image(product_id, image_id).await?;
            return Ok(Some(image_id));
        }

        // 3. A local filesystem path, ingested synchronously.
        if is_local_path(source) {
            return match tokio::fs::read(source).await {
                Ok(bytes) => {
                    let image_id = self
                        .ingest_and_attach(product_id, basename(source), &bytes)
                        .await?;
                    Ok(Some(image_id))
                }
                Err(err) => {
                    warn!(source, error = %err, "local image path could not be read");
                    Ok(None)
                }
            };
        }

        // 4. A remote source, fetched by the background worker.
        if is_url(source) {
            self.jobs.enqueue(Job::FetchRemoteImage {
                product_id,
                source: source.to_string(),
            });
            return Ok(None);
        }

        debug!(source, "primary_image did not resolve to anything known");
        Ok(None)
    }

    /// Set the product's primary image. Re-attaching the same image is a
    /// no-op (no row update at all).
    pub async fn attach_primary_image(
        &self,
        product_id: Uuid,
        image_id: Uuid,
    ) -> IngestResult<()> {
        let current: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT primary_image_id FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_optional(&*self.db)
                .await?;

        let current = current
            .ok_or_else(|| IngestError::NotFound(format!("product {} not found", product_id)))?;
        if current == Some(image_id) {
            return Ok(());
        }

        sqlx::query("UPDATE products SET primary_image_id = ?, updated_at = ? WHERE id = ?")
            .bind(image_id)
            .bind(chrono::Utc::now())
            .bind(product_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Push bytes through the upload engine (chunked above 10 MiB), ensure an
    /// original image record, queue variant generation and attach.
    ///
    /// Also used by the background worker once a remote fetch lands.
    pub async fn ingest_and_attach(
        &self,
        product_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> IngestResult<Uuid> {
        if bytes.is_empty() {
            return Err(IngestError::validation("image source is empty"));
        }
        let declared = checksum::sha256_hex(bytes);
        let total_size = bytes.len() as i64;
        let total_chunks = bytes.len().div_ceil(INGEST_CHUNK_SIZE) as i64;

        let upload = self
            .uploads
            .initialize(
                filename,
                total_chunks,
                total_size,
                &declared,
                Some(guess_mime(filename).to_string()),
            )
            .await?;

        // Initialize deduplicates against completed uploads; only feed chunks
        // through a fresh session.
        let upload = if upload.status == UploadStatus::Completed {
            upload
        } else {
            for (index, chunk) in bytes.chunks(INGEST_CHUNK_SIZE).enumerate() {
                let encoded = general_purpose::STANDARD.encode(chunk);
                self.uploads
                    .receive_chunk(
                        upload.id,
                        index as i64,
                        &encoded,
                        &checksum::sha256_hex(chunk),
                    )
                    .await?;
            }
            self.uploads.complete(upload.id, false).await?.upload
        };

        let image = self.variants.ensure_original(&upload).await?;
        self.jobs.enqueue(Job::GenerateVariants {
            upload_id: upload.id,
        });
        self.attach_primary_image(product_id, image.id).await?;
        Ok(image.id)
    }

    /// Step 1: find an existing `original` image by path, then by basename
    /// containment, then through its upload's filenames. Most recent wins
    /// within each sub-strategy.
    async fn lookup_existing_image(&self, source: &str) -> IngestResult<Option<Uuid>> {
        let name = basename(source);

        if let Some(id) = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM images WHERE variant = 'original' AND path = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(source)
        .fetch_optional(&*self.db)
        .await?
        {
            return Ok(Some(id));
        }

        if let Some(id) = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM images WHERE variant = 'original' AND path LIKE ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(format!("%{}%", name))
        .fetch_optional(&*self.db)
        .await?
        {
            return Ok(Some(id));
        }

        if let Some(id) = sqlx::query_scalar::<_, Uuid>(
            "SELECT i.id FROM images i
             JOIN uploads u ON u.id = i.upload_id
             WHERE i.variant = 'original' AND u.original_filename = ?
             ORDER BY i.created_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?
        {
            return Ok(Some(id));
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT i.id FROM images i
             JOIN uploads u ON u.id = i.upload_id
             WHERE i.variant = 'original' AND u.stored_filename LIKE ?
             ORDER BY i.created_at DESC LIMIT 1",
        )
        .bind(format!("%{}%", name))
        .fetch_optional(&*self.db)
        .await?;
        Ok(id)
    }

    /// Step 2: find a completed upload by filename and materialise an
    /// `original` image row pointing at its assembled blob.
    async fn lookup_completed_upload(&self, source: &str) -> IngestResult<Option<Uuid>> {
        let name = basename(source);

        let upload = sqlx::query_as::<_, Upload>(
            "SELECT * FROM uploads WHERE status = 'completed' AND original_filename = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;

        let upload = match upload {
            Some(upload) => Some(upload),
            None => {
                sqlx::query_as::<_, Upload>(
                    "SELECT * FROM uploads WHERE status = 'completed' AND stored_filename LIKE ?
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(format!("%{}%", name))
                .fetch_optional(&*self.db)
                .await?
            }
        };

        match upload {
            Some(upload) => {
                let image = self.variants.ensure_original(&upload).await?;
                Ok(Some(image.id))
            }
            None => Ok(None),
        }
    }
}

/// Final path segment of a source, with any URL query or fragment stripped.
pub(crate) fn basename(source: &str) -> &str {
    let stripped = source
        .split(['?', '#'])
        .next()
        .unwrap_or(source)
        .trim_end_matches(['/', '\\']);
    stripped
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(stripped)
}

pub(crate) fn is_url(source: &str) -> bool {
    source.contains("://")
}

fn is_local_path(source: &str) -> bool {
    !is_url(source) && (source.starts_with('/') || source.contains(":\\"))
}


#[cfg(test)]
mod service_tests {
    use super::*;
    use crate::models::image::ImageVariant;
    use crate::models::product::ProductStatus;
    use crate::test_utils::{b64, harness, png_bytes, sha, Harness};
    use chrono::Utc;

    async fn insert_product(h: &Harness, sku: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO products (id, sku, name, description, price_cents, stock_quantity,
                                   status, primary_image_id, created_at, updated_at)
             VALUES (?, ?, ?, NULL, 100, 1, ?, NULL, ?, ?)",
        )
        .bind(id)
        .bind(sku)
        .bind("Test product")
        .bind(ProductStatus::Active)
        .bind(now)
        .bind(now)
        .execute(&*h.db)
        .await
        .unwrap();
        id
    }

    async fn completed_png_upload(h: &Harness, filename: &str) -> Uuid {
        let png = png_bytes(120, 90);
        let upload = h
            .uploads
            .initialize(filename, 1, png.len() as i64, &sha(&png), None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(&png), &sha(&png))
            .await
            .unwrap();
        h.uploads.complete(upload.id, false).await.unwrap();
        upload.id
    }

    #[tokio::test]
    async fn resolves_through_a_completed_upload() {
        let h = harness().await;
        let upload_id = completed_png_upload(&h, "logo.png").await;
        let product_id = insert_product(&h, "SKU-LOGO").await;

        let image_id = h
            .resolver
            .resolve_and_attach(product_id, "logo.png")
            .await
            .unwrap()
            .expect("image attached");

        let (variant, owner): (ImageVariant, Uuid) =
            sqlx::query_as("SELECT variant, upload_id FROM images WHERE id = ?")
                .bind(image_id)
                .fetch_one(&*h.db)
                .await
                .unwrap();
        assert_eq!(variant, ImageVariant::Original);
        assert_eq!(owner, upload_id);

        let primary: Option<Uuid> =
            sqlx::query_scalar("SELECT primary_image_id FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_one(&*h.db)
                .await
                .unwrap();
        assert_eq!(primary, Some(image_id));
    }

    #[tokio::test]
    async fn second_resolution_reuses_the_image_row() {
        let h = harness().await;
        completed_png_upload(&h, "logo.png").await;
        let product_a = insert_product(&h, "SKU-A").await;
        let product_b = insert_product(&h, "SKU-B").await;

        let first = h
            .resolver
            .resolve_and_attach(product_a, "logo.png")
            .await
            .unwrap()
            .unwrap();
        // Second product resolves via the image-table lookup, not a new row.
        let second = h
            .resolver
            .resolve_and_attach(product_b, "logo.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&*h.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn attach_is_idempotent() {
        let h = harness().await;
        completed_png_upload(&h, "logo.png").await;
        let product_id = insert_product(&h, "SKU-A").await;

        let image_id = h
            .resolver
            .resolve_and_attach(product_id, "logo.png")
            .await
            .unwrap()
            .unwrap();

        let before: (Option<Uuid>, chrono::DateTime<Utc>) =
            sqlx::query_as("SELECT primary_image_id, updated_at FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_one(&*h.db)
                .await
                .unwrap();

        h.resolver
            .attach_primary_image(product_id, image_id)
            .await
            .unwrap();

        let after: (Option<Uuid>, chrono::DateTime<Utc>) =
            sqlx::query_as("SELECT primary_image_id, updated_at FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_one(&*h.db)
                .await
                .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn url_sources_are_deferred_to_the_job_queue() {
        let mut h = harness().await;
        let product_id = insert_product(&h, "SKU-URL").await;

        let outcome = h
            .resolver
            .resolve_and_attach(product_id, "https://cdn.example.com/images/banner.png")
            .await
            .unwrap();
        assert!(outcome.is_none());

        match h.jobs_rx.try_recv().unwrap() {
            Job::FetchRemoteImage { product_id: pid, source } => {
                assert_eq!(pid, product_id);
                assert_eq!(source, "https://cdn.example.com/images/banner.png");
            }
            other => panic!("expected FetchRemoteImage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_paths_are_ingested_synchronously() {
        let mut h = harness().await;
        let product_id = insert_product(&h, "SKU-LOCAL").await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("shelf.png");
        tokio::fs::write(&file_path, png_bytes(64, 64)).await.unwrap();

        let image_id = h
            .resolver
            .resolve_and_attach(product_id, file_path.to_str().unwrap())
            .await
            .unwrap()
            .expect("image attached");

        let primary: Option<Uuid> =
            sqlx::query_scalar("SELECT primary_image_id FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_one(&*h.db)
                .await
                .unwrap();
        assert_eq!(primary, Some(image_id));

        // The upload engine ran for real and variant generation was queued.
        let upload_status: String =
            sqlx::query_scalar("SELECT status FROM uploads ORDER BY created_at DESC LIMIT 1")
                .fetch_one(&*h.db)
                .await
                .unwrap();
        assert_eq!(upload_status, "completed");
        assert!(matches!(
            h.jobs_rx.try_recv().unwrap(),
            Job::GenerateVariants { .. }
        ));
    }

    #[tokio::test]
    async fn unreadable_local_path_resolves_to_nothing() {
        let h = harness().await;
        let product_id = insert_product(&h, "SKU-GONE").await;
        let outcome = h
            .resolver
            .resolve_and_attach(product_id, "/nonexistent/image.png")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn unresolvable_bare_names_resolve_to_nothing() {
        let h = harness().await;
        let product_id = insert_product(&h, "SKU-NONE").await;
        let outcome = h
            .resolver
            .resolve_and_attach(product_id, "never-uploaded.png")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
