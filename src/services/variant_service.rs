//! Variant generation: turns a completed upload's assembled blob into a set
//! of resized Image records.
//!
//! Variants are bounded by a maximum dimension on the longer edge (small 256,
//! medium 512, large 1024); aspect ratio is preserved and images are never
//! upscaled. Output is encoded at quality 85 for JPEG sources. Generation is
//! idempotent per `(upload_id, variant)` and one failed variant never blocks
//! the others.

use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageFormat};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{IngestError, IngestResult};
use crate::models::image::{Image, ImageVariant};
use crate::models::upload::Upload;
use crate::services::blob_store::BlobStore;

/// JPEG encode quality for resized variants.
const ENCODE_QUALITY: u8 = 85;

/// MIME types the generator will decode.
pub fn is_supported_image(mime: &str) -> bool {
    matches!(
        mime,
        "image/jpeg" | "image/png" | "image/gif" | "image/webp"
    )
}

/// Guess a MIME type from a filename extension. Defaults to octet-stream for
/// anything unrecognised.
pub fn guess_mime(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

/// File extension for a supported image MIME type.
fn mime_to_ext(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/jpeg" => "jpg",
        _ => "bin",
    }
}

fn mime_to_format(mime: &str) -> Option<ImageFormat> {
    match mime {
        "image/png" => Some(ImageFormat::Png),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        _ => None,
    }
}

/// Target dimensions for a resize bound: pass-through when the longer edge
/// already fits, otherwise scale both edges by `max_dim / longer` rounding to
/// the nearest pixel.
pub(crate) fn target_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dim {
        return (width, height);
    }
    let scale = max_dim as f64 / longer as f64;
    let w = (width as f64 * scale).round() as u32;
    let h = (height as f64 * scale).round() as u32;
    (w.max(1), h.max(1))
}

/// Generates and records image variants for completed uploads.
#[derive(Clone)]
pub struct VariantService {
    db: Arc<SqlitePool>,
    blobs: BlobStore,
}

impl VariantService {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Produce all variants for a completed upload.
    ///
    /// Existing `(upload_id, variant)` rows are reused rather than
    /// regenerated. Per-variant failures are logged and skipped; the
    /// successful variants are still persisted and returned.
    pub async fn generate(&self, upload: &Upload) -> IngestResult<Vec<Image>> {
        let mime = upload
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime(&upload.original_filename).to_string());
        if !is_supported_image(&mime) {
            return Err(IngestError::validation(format!(
                "unsupported image type `{}`",
                mime
            )));
        }

        let source_path = format!("uploads/{}", upload.stored_filename);
        let bytes = self.blobs.get(&source_path).await?;

        let mut images = Vec::with_capacity(ImageVariant::ALL.len());
        for variant in ImageVariant::ALL {
            if let Some(existing) = self.find_existing(upload.id, variant).await? {
                debug!(upload_id = %upload.id, variant = variant.as_str(), "variant already exists");
                images.push(existing);
                continue;
            }
            match self.produce(upload, variant, &bytes, &mime).await {
                Ok(image) => images.push(image),
                Err(err) => {
                    warn!(
                        upload_id = %upload.id,
                        variant = variant.as_str(),
                        error = %err,
                        "variant generation failed, continuing with remaining variants"
                    );
                }
            }
        }
        Ok(images)
    }

    /// Ensure an `original` Image row exists for a completed upload,
    /// pointing at its assembled blob. Used when a catalogue import
    /// references an upload that has no image records yet.
    pub async fn ensure_original(&self, upload: &Upload) -> IngestResult<Image> {
        if let Some(existing) = self.find_existing(upload.id, ImageVariant::Original).await? {
            return Ok(existing);
        }

        let path = format!("uploads/{}", upload.stored_filename);
        let mime = upload
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime(&upload.original_filename).to_string());
        let bytes = self.blobs.get(&path).await?;
        let size_bytes = bytes.len() as i64;
        let (width, height) = probe_dimensions(bytes).await;

        self.insert_image(upload.id, ImageVariant::Original, &path, width, height, size_bytes, &mime)
            .await
    }

    async fn find_existing(
        &self,
        upload_id: Uuid,
        variant: ImageVariant,
    ) -> IngestResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(
            "SELECT id, upload_id, variant, path, width, height, size_bytes, mime_type, created_at
             FROM images WHERE upload_id = ? AND variant = ?",
        )
        .bind(upload_id)
        .bind(variant)
        .fetch_optional(&*self.db)
        .await?;
        Ok(image)
    }

    async fn produce(
        &self,
        upload: &Upload,
        variant: ImageVariant,
        source: &[u8],
        mime: &str,
    ) -> IngestResult<Image> {
        let (encoded, width, height) = match variant.max_dimension() {
            // Original: byte-for-byte copy of the assembled blob.
            None => {
                let (w, h) = probe_dimensions(source.to_vec()).await;
                (source.to_vec(), w, h)
            }
            Some(max_dim) => {
                let bytes = source.to_vec();
                let mime_owned = mime.to_string();
                let (out, w, h) =
                    tokio::task::spawn_blocking(move || resize_encode(&bytes, max_dim, &mime_owned))
                        .await
                        .map_err(|err| IngestError::Internal(err.into()))?
                        .map_err(|err| {
                            IngestError::Internal(anyhow::anyhow!("image processing failed: {err}"))
                        })?;
                (out, w as i64, h as i64)
            }
        };

        let path = format!(
            "images/{}/{}.{}",
            variant.as_str(),
            Uuid::new_v4(),
            mime_to_ext(mime)
        );
        let size_bytes = encoded.len() as i64;
        self.blobs.put(&path, &encoded).await?;

        self.insert_image(upload.id, variant, &path, width, height, size_bytes, mime)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_image(
        &self,
        upload_id: Uuid,
        variant: ImageVariant,
        path: &str,
        width: i64,
        height: i64,
        size_bytes: i64,
        mime: &str,
    ) -> IngestResult<Image> {
        let image = Image {
            id: Uuid::new_v4(),
            upload_id,
            variant,
            path: path.to_string(),
            width,
            height,
            size_bytes,
            mime_type: mime.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO images (id, upload_id, variant, path, width, height, size_bytes, mime_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(image.id)
        .bind(image.upload_id)
        .bind(image.variant)
        .bind(&image.path)
        .bind(image.width)
        .bind(image.height)
        .bind(image.size_bytes)
        .bind(&image.mime_type)
        .bind(image.created_at)
        .execute(&*self.db)
        .await?;

        Ok(image)
    }
}

/// Decode, resize to the variant bound and re-encode. CPU-bound; run inside
/// `spawn_blocking`.
fn resize_encode(
    bytes: &[u8],
    max_dim: u32,
    mime: &str,
) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = (img.width(), img.height());
    let (tw, th) = target_dimensions(w, h, max_dim);

    let resized = if (tw, th) == (w, h) {
        img
    } else {
        img.resize_exact(tw, th, FilterType::Lanczos3)
    };

    let mut out = Vec::new();
    match mime {
        "image/jpeg" => {
            let encoder = JpegEncoder::new_with_quality(&mut out, ENCODE_QUALITY);
            resized.write_with_encoder(encoder)?;
        }
        other => {
            let format = mime_to_format(other).unwrap_or(ImageFormat::Png);
            resized.write_to(&mut Cursor::new(&mut out), format)?;
        }
    }
    Ok((out, tw, th))
}

/// Best-effort dimension probe; (0, 0) when the bytes are not decodable.
async fn probe_dimensions(bytes: Vec<u8>) -> (i64, i64) {
    let probed = tokio::task::spawn_blocking(move || {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    })
    .await
    .ok()
    .flatten();

    match probed {
        Some((w, h)) => (w as i64, h as i64),
        None => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_when_within_bound() {
        assert_eq!(target_dimensions(200, 100, 256), (200, 100));
        assert_eq!(target_dimensions(256, 256, 256), (256, 256));
    }

    #[test]
    fn scales_longer_edge_to_bound() {
        assert_eq!(target_dimensions(1024, 512, 256), (256, 128));
        assert_eq!(target_dimensions(512, 1024, 256), (128, 256));
        // 3000x2000 -> scale 1024/3000, rounds to nearest
        assert_eq!(target_dimensions(3000, 2000, 1024), (1024, 683));
    }

    #[test]
    fn never_collapses_to_zero() {
        assert_eq!(target_dimensions(10_000, 1, 256), (256, 1));
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(guess_mime("Photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("logo.png"), "image/png");
        assert_eq!(guess_mime("anim.gif"), "image/gif");
        assert_eq!(guess_mime("pic.webp"), "image/webp");
        assert_eq!(guess_mime("report.pdf"), "application/octet-stream");
    }

    #[test]
    fn supported_types() {
        assert!(is_supported_image("image/jpeg"));
        assert!(is_supported_image("image/webp"));
        assert!(!is_supported_image("application/pdf"));
    }
}
