//! Represents chunked upload sessions and their received chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an upload session.
///
/// Transitions are monotonic: `Pending -> Uploading -> Completed | Failed`,
/// and `Pending | Uploading -> Cancelled`. Terminal states are never left.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    /// True once the upload can no longer accept chunks or complete.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }
}

/// A chunked upload session, initiated before transferring a large blob in
/// parts.
///
/// The `Upload` row stores metadata and progress counters, not the content
/// bytes: chunks live in the blob store under `chunks/<id>/chunk_<n>` until
/// assembly, after which the whole blob lives at `uploads/<stored_filename>`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Upload {
    /// Internal UUID, also the client-facing upload id.
    pub id: Uuid,

    /// Filename as supplied by the client.
    pub original_filename: String,

    /// Server-generated filename of the assembled blob.
    pub stored_filename: String,

    /// MIME type if declared by the client.
    pub mime_type: Option<String>,

    /// Total blob size in bytes.
    pub total_size: i64,

    /// Total number of chunks expected.
    pub total_chunks: i64,

    /// Number of distinct chunks received so far. Kept equal to the
    /// cardinality of this upload's `upload_chunks` rows.
    pub uploaded_chunks: i64,

    /// Client-declared SHA-256 of the whole blob, 64 lowercase hex chars.
    pub checksum_sha256: String,

    pub status: UploadStatus,

    /// Human-readable reason recorded when status is failed or cancelled.
    pub failure_reason: Option<String>,

    /// Set when the assembled blob passed verification.
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    /// Upload progress as a percentage, rounded to two decimals.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        let pct = self.uploaded_chunks as f64 * 100.0 / self.total_chunks as f64;
        (pct * 100.0).round() / 100.0
    }

    /// Check if every expected chunk has been received.
    pub fn has_all_chunks(&self) -> bool {
        self.uploaded_chunks >= self.total_chunks
    }
}

/// Represents a single received chunk of an upload session.
///
/// The set of `UploadChunk` rows for an upload IS its received-chunk set;
/// inserting with `ON CONFLICT DO NOTHING` makes chunk receipt idempotent.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadChunk {
    /// Reference to the parent upload session.
    pub upload_id: Uuid,

    /// Chunk index (0-based, `< total_chunks`).
    pub chunk_index: i64,

    /// Size in bytes of the decoded chunk.
    pub size_bytes: i64,

    /// SHA-256 of the decoded chunk bytes.
    pub checksum_sha256: String,

    /// Timestamp when this chunk was stored.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_with(uploaded: i64, total: i64) -> Upload {
        Upload {
            id: Uuid::new_v4(),
            original_filename: "photo.jpg".into(),
            stored_filename: "abc.jpg".into(),
            mime_type: Some("image/jpeg".into()),
            total_size: 10,
            total_chunks: total,
            uploaded_chunks: uploaded,
            checksum_sha256: "0".repeat(64),
            status: UploadStatus::Uploading,
            failure_reason: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn progress_rounds_to_two_decimals() {
        assert_eq!(upload_with(3, 5).progress(), 60.00);
        assert_eq!(upload_with(1, 3).progress(), 33.33);
        assert_eq!(upload_with(0, 5).progress(), 0.0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
    }
}
