//! src/services/upload_service.rs
//!
//! UploadService — the chunked upload state machine. Owns initialize,
//! per-chunk receipt with idempotency and checksum verification, ordered
//! assembly with whole-file verification, resume, cancel and post-completion
//! verification.
//!
//! Every mutating operation on a given upload runs under that upload's
//! exclusive lock (see `services::locks`), so two concurrent receivers for
//! the same `(upload_id, chunk_index)` produce one stored chunk and one
//! idempotent no-op.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{IngestError, IngestResult};
use crate::models::image::Image;
use crate::models::upload::{Upload, UploadStatus};
use crate::services::blob_store::BlobStore;
use crate::services::checksum;
use crate::services::locks::UploadLocks;
use crate::services::variant_service::{guess_mime, is_supported_image, VariantService};

pub const MAX_TOTAL_CHUNKS: i64 = 10_000;
pub const MAX_TOTAL_SIZE: i64 = 5 * 1024 * 1024 * 1024; // 5 GiB
pub const MIN_CHUNK_SIZE: i64 = 5 * 1024; // 5 KiB
pub const MAX_CHUNK_SIZE: i64 = 100 * 1024 * 1024; // 100 MiB

/// Blob-store path of one transient chunk.
pub fn chunk_path(upload_id: Uuid, chunk_index: i64) -> String {
    format!("chunks/{}/chunk_{}", upload_id, chunk_index)
}

/// Blob-store prefix holding all of an upload's transient chunks.
pub fn chunk_prefix(upload_id: Uuid) -> String {
    format!("chunks/{}", upload_id)
}

/// Blob-store path of the assembled, durable blob.
pub fn blob_path(stored_filename: &str) -> String {
    format!("uploads/{}", stored_filename)
}

/// Outcome of a chunk receipt, echoed back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReceipt {
    pub upload_id: Uuid,
    pub chunk_index: i64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    pub progress: f64,
    pub status: UploadStatus,
}

/// Outcome of a successful (or idempotent) complete call.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteOutcome {
    pub upload: Upload,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadStatusView {
    pub status: UploadStatus,
    pub progress: f64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeView {
    pub can_resume: bool,
    pub uploaded_chunks: Vec<i64>,
    pub missing_chunks: Vec<i64>,
    pub progress: f64,
}

#[derive(Clone)]
pub struct UploadService {
    db: Arc<SqlitePool>,
    blobs: BlobStore,
    locks: Arc<UploadLocks>,
    variants: VariantService,
}

impl UploadService {
    pub fn new(
        db: Arc<SqlitePool>,
        blobs: BlobStore,
        locks: Arc<UploadLocks>,
        variants: VariantService,
    ) -> Self {
        Self {
            db,
            blobs,
            locks,
            variants,
        }
    }

    /// Start (or deduplicate) an upload session.
    ///
    /// If a completed upload already exists with the same whole-file
    /// checksum, that upload is returned unchanged; otherwise a fresh
    /// `pending` session is created.
    pub async fn initialize(
        &self,
        original_filename: &str,
        total_chunks: i64,
        total_size: i64,
        checksum_sha256: &str,
        mime_type: Option<String>,
    ) -> IngestResult<Upload> {
        if original_filename.trim().is_empty() {
            return Err(IngestError::validation("original_filename must not be empty"));
        }
        if !(1..=MAX_TOTAL_CHUNKS).contains(&total_chunks) {
            return Err(IngestError::validation(format!(
                "total_chunks must be between 1 and {}",
                MAX_TOTAL_CHUNKS
            )));
        }
        if !(1..=MAX_TOTAL_SIZE).contains(&total_size) {
            return Err(IngestError::validation(format!(
                "total_size must be between 1 and {} bytes",
                MAX_TOTAL_SIZE
            )));
        }
        if !checksum::is_valid_sha256_hex(checksum_sha256) {
            return Err(IngestError::validation(
                "checksum_sha256 must be 64 hexadecimal characters",
            ));
        }
        let implied_chunk = total_size / total_chunks;
        if implied_chunk > MAX_CHUNK_SIZE {
            return Err(IngestError::validation(format!(
                "implied chunk size {} exceeds the {} byte maximum",
                implied_chunk, MAX_CHUNK_SIZE
            )));
        }
        // Files smaller than one minimum chunk are exempt from the lower
        // bound; a 10-byte file may still arrive in two chunks.
        if total_size >= MIN_CHUNK_SIZE && implied_chunk < MIN_CHUNK_SIZE {
            return Err(IngestError::validation(format!(
                "implied chunk size {} is below the {} byte minimum",
                implied_chunk, MIN_CHUNK_SIZE
            )));
        }

        let declared = checksum_sha256.to_ascii_lowercase();

        // Deduplicate against completed uploads with the same content hash.
        if let Some(existing) = sqlx::query_as::<_, Upload>(
            "SELECT * FROM uploads
             WHERE checksum_sha256 = ? AND status = 'completed'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(&declared)
        .fetch_optional(&*self.db)
        .await?
        {
            info!(upload_id = %existing.id, "initialize deduplicated against completed upload");
            return Ok(existing);
        }

        let now = Utc::now();
        let mime_type = mime_type
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(guess_mime(original_filename).to_string()));
        let upload = Upload {
            id: Uuid::new_v4(),
            original_filename: original_filename.to_string(),
            stored_filename: stored_filename_for(original_filename),
            mime_type,
            total_size,
            total_chunks,
            uploaded_chunks: 0,
            checksum_sha256: declared,
            status: UploadStatus::Pending,
            failure_reason: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO uploads (id, original_filename, stored_filename, mime_type, total_size,
                                  total_chunks, uploaded_chunks, checksum_sha256, status,
                                  failure_reason, completed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(&upload.original_filename)
        .bind(&upload.stored_filename)
        .bind(&upload.mime_type)
        .bind(upload.total_size)
        .bind(upload.total_chunks)
        .bind(upload.uploaded_chunks)
        .bind(&upload.checksum_sha256)
        .bind(upload.status)
        .bind(&upload.failure_reason)
        .bind(upload.completed_at)
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&*self.db)
        .await?;

        debug!(upload_id = %upload.id, total_chunks, total_size, "upload initialized");
        Ok(upload)
    }

    /// Receive one chunk under the upload's exclusive lock.
    pub async fn receive_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: i64,
        base64_data: &str,
        chunk_checksum: &str,
    ) -> IngestResult<ChunkReceipt> {
        let _guard = self.locks.acquire(upload_id).await;

        let upload = self.fetch_upload(upload_id).await?;
        match upload.status {
            // Re-sends after completion are reported as success.
            UploadStatus::Completed => return Ok(receipt_for(&upload, chunk_index)),
            UploadStatus::Failed | UploadStatus::Cancelled => {
                return Err(IngestError::StateConflict(format!(
                    "upload is {} and no longer accepts chunks",
                    upload.status.as_str()
                )));
            }
            UploadStatus::Pending | UploadStatus::Uploading => {}
        }

        if !(0..upload.total_chunks).contains(&chunk_index) {
            return Err(IngestError::validation(format!(
                "chunk_index {} out of range 0..{}",
                chunk_index, upload.total_chunks
            )));
        }

        // Already have this chunk: idempotent no-op.
        if self.chunk_recorded(upload_id, chunk_index).await? {
            debug!(upload_id = %upload_id, chunk_index, "duplicate chunk ignored");
            return Ok(receipt_for(&upload, chunk_index));
        }

        let bytes = general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|err| IngestError::Malformed(format!("chunk_data is not valid base64: {err}")))?;

        let digest = checksum::sha256_hex(&bytes);
        if !checksum::checksums_match(&digest, chunk_checksum) {
            return Err(IngestError::ChecksumMismatch(format!(
                "chunk {} checksum does not match its payload",
                chunk_index
            )));
        }

        // Store, then read back and re-hash to catch silent corruption.
        let path = chunk_path(upload_id, chunk_index);
        self.blobs.put(&path, &bytes).await?;
        let stored = self.blobs.get(&path).await?;
        if !checksum::checksums_match(&checksum::sha256_hex(&stored), &digest) {
            self.blobs.delete(&path).await?;
            return Err(IngestError::Storage(
                crate::services::blob_store::BlobError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("stored chunk {} failed verification", chunk_index),
                )),
            ));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO upload_chunks (upload_id, chunk_index, size_bytes, checksum_sha256, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (upload_id, chunk_index) DO NOTHING",
        )
        .bind(upload_id)
        .bind(chunk_index)
        .bind(bytes.len() as i64)
        .bind(&digest)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            sqlx::query(
                "UPDATE uploads
                 SET uploaded_chunks = uploaded_chunks + 1, status = 'uploading', updated_at = ?
                 WHERE id = ?",
            )
            .bind(now)
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let upload = self.fetch_upload(upload_id).await?;
        Ok(receipt_for(&upload, chunk_index))
    }

    /// Assemble and verify the upload under its exclusive lock.
    ///
    /// Idempotent for already-completed uploads. Requires every chunk to be
    /// present; a whole-file checksum mismatch marks the upload `failed` and
    /// removes the assembled blob.
    pub async fn complete(
        &self,
        upload_id: Uuid,
        generate_variants: bool,
    ) -> IngestResult<CompleteOutcome> {
        let _guard = self.locks.acquire(upload_id).await;

        let upload = self.fetch_upload(upload_id).await?;
        match upload.status {
            UploadStatus::Completed => {
                let images = self.images_for(upload_id).await?;
                return Ok(CompleteOutcome { upload, images });
            }
            UploadStatus::Failed | UploadStatus::Cancelled => {
                return Err(IngestError::StateConflict(format!(
                    "upload is {} and cannot be completed",
                    upload.status.as_str()
                )));
            }
            UploadStatus::Pending | UploadStatus::Uploading => {}
        }

        if !upload.has_all_chunks() {
            let missing = self.missing_chunk_indices(&upload).await?;
            return Err(IngestError::StateConflict(format!(
                "missing_chunks: {} of {} chunks not yet received (missing indices {:?})",
                missing.len(),
                upload.total_chunks,
                truncate_list(&missing, 20),
            )));
        }

        let sources: Vec<String> = (0..upload.total_chunks)
            .map(|i| chunk_path(upload_id, i))
            .collect();
        let dest = blob_path(&upload.stored_filename);
        self.blobs.concat_into(&dest, &sources).await?;

        let assembled = self.blobs.path_on_fs(&dest)?;
        let actual = checksum::sha256_hex_file(&assembled).await?;
        if !checksum::checksums_match(&actual, &upload.checksum_sha256) {
            self.blobs.delete(&dest).await?;
            self.blobs.delete_prefix(&chunk_prefix(upload_id)).await?;
            self.mark_terminal(upload_id, UploadStatus::Failed, Some("checksum mismatch"))
                .await?;
            self.locks.purge(upload_id).await;
            warn!(upload_id = %upload_id, "assembled blob failed checksum verification");
            return Err(IngestError::ChecksumMismatch(
                "assembled file checksum does not match the declared checksum".into(),
            ));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE uploads SET status = 'completed', completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(upload_id)
        .execute(&*self.db)
        .await?;

        self.blobs.delete_prefix(&chunk_prefix(upload_id)).await?;

        let upload = self.fetch_upload(upload_id).await?;
        info!(upload_id = %upload_id, size = upload.total_size, "upload completed");

        let mut images = Vec::new();
        if generate_variants {
            let mime = upload
                .mime_type
                .clone()
                .unwrap_or_else(|| guess_mime(&upload.original_filename).to_string());
            if is_supported_image(&mime) {
                match self.variants.generate(&upload).await {
                    Ok(generated) => images = generated,
                    Err(err) => {
                        warn!(upload_id = %upload_id, error = %err, "variant generation failed");
                    }
                }
            }
        }

        self.locks.purge(upload_id).await;
        Ok(CompleteOutcome { upload, images })
    }

    pub async fn status(&self, upload_id: Uuid) -> IngestResult<UploadStatusView> {
        let upload = self.fetch_upload(upload_id).await?;
        Ok(UploadStatusView {
            status: upload.status,
            progress: upload.progress(),
            uploaded_chunks: upload.uploaded_chunks,
            total_chunks: upload.total_chunks,
            completed_at: upload.completed_at,
        })
    }

    /// Report which chunks are present and which are still needed.
    pub async fn resume(&self, upload_id: Uuid) -> IngestResult<ResumeView> {
        let upload = self.fetch_upload(upload_id).await?;
        let uploaded = self.uploaded_chunk_indices(upload_id).await?;
        let missing: Vec<i64> = (0..upload.total_chunks)
            .filter(|i| uploaded.binary_search(i).is_err())
            .collect();

        Ok(ResumeView {
            can_resume: matches!(
                upload.status,
                UploadStatus::Pending | UploadStatus::Uploading
            ),
            uploaded_chunks: uploaded,
            missing_chunks: missing,
            progress: upload.progress(),
        })
    }

    /// Cancel an in-flight upload. Returns false for unknown uploads and for
    /// uploads already in a terminal state.
    pub async fn cancel(&self, upload_id: Uuid) -> IngestResult<bool> {
        let _guard = self.locks.acquire(upload_id).await;

        let upload = match self.fetch_upload(upload_id).await {
            Ok(upload) => upload,
            Err(IngestError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        if upload.status.is_terminal() {
            return Ok(false);
        }

        self.blobs.delete_prefix(&chunk_prefix(upload_id)).await?;
        self.mark_terminal(upload_id, UploadStatus::Cancelled, Some("Cancelled"))
            .await?;
        self.locks.purge(upload_id).await;
        info!(upload_id = %upload_id, "upload cancelled");
        Ok(true)
    }

    /// Re-hash the assembled blob of a completed upload and compare against
    /// the declared checksum.
    pub async fn verify_checksum(&self, upload_id: Uuid) -> IngestResult<bool> {
        let upload = self.fetch_upload(upload_id).await?;
        if upload.status != UploadStatus::Completed {
            return Err(IngestError::StateConflict(
                "checksum verification requires a completed upload".into(),
            ));
        }
        let assembled = self.blobs.path_on_fs(&blob_path(&upload.stored_filename))?;
        let actual = checksum::sha256_hex_file(&assembled).await?;
        Ok(checksum::checksums_match(&actual, &upload.checksum_sha256))
    }

    pub async fn fetch_upload(&self, upload_id: Uuid) -> IngestResult<Upload> {
        sqlx::query_as::<_, Upload>("SELECT * FROM uploads WHERE id = ?")
            .bind(upload_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("upload {} not found", upload_id)))
    }

    pub async fn images_for(&self, upload_id: Uuid) -> IngestResult<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(
            "SELECT id, upload_id, variant, path, width, height, size_bytes, mime_type, created_at
             FROM images WHERE upload_id = ? ORDER BY created_at ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(images)
    }

    async fn chunk_recorded(&self, upload_id: Uuid, chunk_index: i64) -> IngestResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ? AND chunk_index = ?",
        )
        .bind(upload_id)
        .bind(chunk_index)
        .fetch_one(&*self.db)
        .await?;
        Ok(count > 0)
    }

    async fn uploaded_chunk_indices(&self, upload_id: Uuid) -> IngestResult<Vec<i64>> {
        let indices: Vec<i64> = sqlx::query_scalar(
            "SELECT chunk_index FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(indices)
    }

    async fn missing_chunk_indices(&self, upload: &Upload) -> IngestResult<Vec<i64>> {
        let uploaded = self.uploaded_chunk_indices(upload.id).await?;
        Ok((0..upload.total_chunks)
            .filter(|i| uploaded.binary_search(i).is_err())
            .collect())
    }

    async fn mark_terminal(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
        reason: Option<&str>,
    ) -> IngestResult<()> {
        sqlx::query("UPDATE uploads SET status = ?, failure_reason = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(reason)
            .bind(Utc::now())
            .bind(upload_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

fn receipt_for(upload: &Upload, chunk_index: i64) -> ChunkReceipt {
    ChunkReceipt {
        upload_id: upload.id,
        chunk_index,
        uploaded_chunks: upload.uploaded_chunks,
        total_chunks: upload.total_chunks,
        progress: upload.progress(),
        status: upload.status,
    }
}

/// Server-side filename for the assembled blob; keeps the original extension
/// so MIME sniffing by extension still works downstream.
fn stored_filename_for(original: &str) -> String {
    let ext = std::path::Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}{}", Uuid::new_v4(), ext)
}

fn truncate_list(list: &[i64], max: usize) -> Vec<i64> {
    list.iter().copied().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{b64, harness, png_bytes, sha};

    const HELLOWORLD_SHA256: &str =
        "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";

    #[tokio::test]
    async fn two_chunk_happy_path() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        assert_eq!(upload.status, UploadStatus::Pending);
        assert_eq!(upload.uploaded_chunks, 0);

        let r0 = h
            .uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();
        assert_eq!(r0.uploaded_chunks, 1);
        assert_eq!(r0.status, UploadStatus::Uploading);
        assert_eq!(r0.progress, 50.0);

        let r1 = h
            .uploads
            .receive_chunk(upload.id, 1, &b64(b"world"), &sha(b"world"))
            .await
            .unwrap();
        assert_eq!(r1.uploaded_chunks, 2);
        assert_eq!(r1.progress, 100.0);

        let outcome = h.uploads.complete(upload.id, true).await.unwrap();
        assert_eq!(outcome.upload.status, UploadStatus::Completed);
        assert!(outcome.upload.completed_at.is_some());
        // Not an image: no variants.
        assert!(outcome.images.is_empty());

        let blob = h
            .blobs
            .get(&blob_path(&outcome.upload.stored_filename))
            .await
            .unwrap();
        assert_eq!(blob, b"helloworld");

        // Chunk directory is gone once the upload is terminal.
        assert!(!h.blobs.exists(&chunk_path(upload.id, 0)).await.unwrap());
        assert!(!h.blobs.exists(&chunk_path(upload.id, 1)).await.unwrap());

        assert!(h.uploads.verify_checksum(upload.id).await.unwrap());
        // Stable across calls: no post-complete mutation.
        assert!(h.uploads.verify_checksum(upload.id).await.unwrap());
    }

    #[tokio::test]
    async fn chunk_resend_is_a_no_op() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();

        let again = h
            .uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();
        assert_eq!(again.uploaded_chunks, 1);
        assert_eq!(again.status, UploadStatus::Uploading);
    }

    #[tokio::test]
    async fn concurrent_same_chunk_receives_once() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();

        let b64_hello = b64(b"hello");
        let sha_hello = sha(b"hello");
        let a = h
            .uploads
            .receive_chunk(upload.id, 0, &b64_hello, &sha_hello);
        let b = h
            .uploads
            .receive_chunk(upload.id, 0, &b64_hello, &sha_hello);
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        let refreshed = h.uploads.fetch_upload(upload.id).await.unwrap();
        assert_eq!(refreshed.uploaded_chunks, 1);
    }

    #[tokio::test]
    async fn complete_with_wrong_declared_checksum_fails_the_upload() {
        let h = harness().await;
        let declared = "0".repeat(64);
        let upload = h
            .uploads
            .initialize("data.bin", 1, 5, &declared, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();

        let err = h.uploads.complete(upload.id, false).await.unwrap_err();
        assert!(matches!(err, IngestError::ChecksumMismatch(_)));

        let failed = h.uploads.fetch_upload(upload.id).await.unwrap();
        assert_eq!(failed.status, UploadStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("checksum mismatch"));
        assert!(!h
            .blobs
            .exists(&blob_path(&failed.stored_filename))
            .await
            .unwrap());
        // Terminal state: transient chunks are gone too.
        assert!(!h.blobs.exists(&chunk_path(upload.id, 0)).await.unwrap());

        // Terminal: a second complete is a state conflict.
        let err = h.uploads.complete(upload.id, false).await.unwrap_err();
        assert!(matches!(err, IngestError::StateConflict(_)));
    }

    #[tokio::test]
    async fn resume_partitions_the_chunk_set() {
        let h = harness().await;
        let data = b"aabbccddee";
        let upload = h
            .uploads
            .initialize("data.bin", 5, 10, &sha(data), None)
            .await
            .unwrap();
        for index in [0i64, 2, 4] {
            let piece = &data[(index as usize * 2)..(index as usize * 2 + 2)];
            h.uploads
                .receive_chunk(upload.id, index, &b64(piece), &sha(piece))
                .await
                .unwrap();
        }

        let resume = h.uploads.resume(upload.id).await.unwrap();
        assert!(resume.can_resume);
        assert_eq!(resume.uploaded_chunks, vec![0, 2, 4]);
        assert_eq!(resume.missing_chunks, vec![1, 3]);
        assert_eq!(resume.progress, 60.0);
    }

    #[tokio::test]
    async fn complete_with_missing_chunks_is_a_conflict() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();

        let err = h.uploads.complete(upload.id, false).await.unwrap_err();
        match err {
            IngestError::StateConflict(message) => assert!(message.contains("missing_chunks")),
            other => panic!("expected StateConflict, got {other:?}"),
        }

        // Recoverable: the missing chunk can still arrive.
        h.uploads
            .receive_chunk(upload.id, 1, &b64(b"world"), &sha(b"world"))
            .await
            .unwrap();
        h.uploads.complete(upload.id, false).await.unwrap();
    }

    #[tokio::test]
    async fn complete_twice_is_idempotent() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 1, &b64(b"world"), &sha(b"world"))
            .await
            .unwrap();

        let first = h.uploads.complete(upload.id, false).await.unwrap();
        let second = h.uploads.complete(upload.id, false).await.unwrap();
        assert_eq!(first.upload.id, second.upload.id);
        assert_eq!(second.upload.status, UploadStatus::Completed);

        // Chunk re-send after completion reports success without change.
        let receipt = h
            .uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();
        assert_eq!(receipt.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn initialize_deduplicates_completed_uploads() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 1, &b64(b"world"), &sha(b"world"))
            .await
            .unwrap();
        h.uploads.complete(upload.id, false).await.unwrap();

        let deduped = h
            .uploads
            .initialize("other.txt", 1, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        assert_eq!(deduped.id, upload.id);
        assert_eq!(deduped.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn pending_uploads_do_not_deduplicate() {
        let h = harness().await;
        let first = h
            .uploads
            .initialize("a.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        let second = h
            .uploads
            .initialize("b.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn cancel_cleans_up_and_is_terminal() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap();

        assert!(h.uploads.cancel(upload.id).await.unwrap());

        let cancelled = h.uploads.fetch_upload(upload.id).await.unwrap();
        assert_eq!(cancelled.status, UploadStatus::Cancelled);
        assert_eq!(cancelled.failure_reason.as_deref(), Some("Cancelled"));
        assert!(!h.blobs.exists(&chunk_path(upload.id, 0)).await.unwrap());

        // Terminal: further chunks are conflicts, further cancels are no-ops.
        let err = h
            .uploads
            .receive_chunk(upload.id, 1, &b64(b"world"), &sha(b"world"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StateConflict(_)));
        assert!(!h.uploads.cancel(upload.id).await.unwrap());

        let resume = h.uploads.resume(upload.id).await.unwrap();
        assert!(!resume.can_resume);
    }

    #[tokio::test]
    async fn cancel_of_unknown_or_completed_returns_false() {
        let h = harness().await;
        assert!(!h.uploads.cancel(Uuid::new_v4()).await.unwrap());

        let upload = h
            .uploads
            .initialize("greeting.txt", 1, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        h.uploads
            .receive_chunk(upload.id, 0, &b64(b"helloworld"), &sha(b"helloworld"))
            .await
            .unwrap();
        h.uploads.complete(upload.id, false).await.unwrap();
        assert!(!h.uploads.cancel(upload.id).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_chunks_are_rejected_without_state_change() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("greeting.txt", 2, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();

        let err = h
            .uploads
            .receive_chunk(upload.id, 0, "not-base64!!!", &sha(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));

        let err = h
            .uploads
            .receive_chunk(upload.id, 0, &b64(b"hello"), &sha(b"other"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ChecksumMismatch(_)));

        let err = h
            .uploads
            .receive_chunk(upload.id, 2, &b64(b"hello"), &sha(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation { .. }));

        let refreshed = h.uploads.fetch_upload(upload.id).await.unwrap();
        assert_eq!(refreshed.uploaded_chunks, 0);
        assert_eq!(refreshed.status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn initialize_validates_bounds() {
        let h = harness().await;
        let checksum = HELLOWORLD_SHA256;

        assert!(h.uploads.initialize("a", 0, 10, checksum, None).await.is_err());
        assert!(h
            .uploads
            .initialize("a", MAX_TOTAL_CHUNKS + 1, 10, checksum, None)
            .await
            .is_err());
        assert!(h
            .uploads
            .initialize("a", 1, MAX_TOTAL_SIZE + 1, checksum, None)
            .await
            .is_err());
        assert!(h.uploads.initialize("a", 1, 10, "xyz", None).await.is_err());
        assert!(h.uploads.initialize("a", 1, 10, &"g".repeat(64), None).await.is_err());

        // 5 GiB - 1 in one chunk exceeds the per-chunk ceiling...
        assert!(h
            .uploads
            .initialize("a", 1, MAX_TOTAL_SIZE - 1, checksum, None)
            .await
            .is_err());
        // ...but is fine spread over enough chunks.
        assert!(h
            .uploads
            .initialize("a", 100, MAX_TOTAL_SIZE - 1, checksum, None)
            .await
            .is_ok());

        // 10 000 chunks at exactly the minimum chunk size.
        assert!(h
            .uploads
            .initialize("a", MAX_TOTAL_CHUNKS, MAX_TOTAL_CHUNKS * MIN_CHUNK_SIZE, checksum, None)
            .await
            .is_ok());

        // Too many chunks for the size once the file is big enough to care.
        assert!(h
            .uploads
            .initialize("a", 100, MIN_CHUNK_SIZE + 1, checksum, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn initialize_lowercases_the_declared_checksum() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("a.txt", 1, 10, &HELLOWORLD_SHA256.to_ascii_uppercase(), None)
            .await
            .unwrap();
        assert_eq!(upload.checksum_sha256, HELLOWORLD_SHA256);
    }

    #[tokio::test]
    async fn verify_requires_completed() {
        let h = harness().await;
        let upload = h
            .uploads
            .initialize("a.txt", 1, 10, HELLOWORLD_SHA256, None)
            .await
            .unwrap();
        let err = h.uploads.verify_checksum(upload.id).await.unwrap_err();
        assert!(matches!(err, IngestError::StateConflict(_)));
    }

    #[tokio::test]
    async fn image_upload_generates_all_variants() {
        let h = harness().await;
        let png = png_bytes(800, 600);
        let upload = h
            .uploads
            .initialize("photo.png", 1, png.len() as i64, &sha(&png), None)
            .await
            .unwrap();
        assert_eq!(upload.mime_type.as_deref(), Some("image/png"));

        h.uploads
            .receive_chunk(upload.id, 0, &b64(&png), &sha(&png))
            .await
            .unwrap();
        let outcome = h.uploads.complete(upload.id, true).await.unwrap();
        assert_eq!(outcome.images.len(), 4);

        let small = outcome
            .images
            .iter()
            .find(|i| i.variant == crate::models::image::ImageVariant::Small)
            .unwrap();
        assert_eq!((small.width, small.height), (256, 192));

        let large = outcome
            .images
            .iter()
            .find(|i| i.variant == crate::models::image::ImageVariant::Large)
            .unwrap();
        // 800px longest edge already fits the 1024 bound: no upscale.
        assert_eq!((large.width, large.height), (800, 600));

        for image in &outcome.images {
            assert!(h.blobs.exists(&image.path).await.unwrap());
        }

        // Variant generation is idempotent per (upload, variant).
        let again = h.uploads.complete(upload.id, true).await.unwrap();
        assert_eq!(again.images.len(), 4);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE upload_id = ?")
            .bind(upload.id)
            .fetch_one(&*h.db)
            .await
            .unwrap();
        assert_eq!(count, 4);
    }
}
