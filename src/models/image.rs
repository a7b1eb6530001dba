//! Represents an image variant derived from a completed upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The resolution tier of a stored image.
///
/// `Original` is a byte-for-byte copy of the assembled blob; the sized
/// variants are bounded by a maximum dimension on the longer edge.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ImageVariant {
    Original,
    Small,
    Medium,
    Large,
}

impl ImageVariant {
    /// All variants in generation order.
    pub const ALL: [ImageVariant; 4] = [
        ImageVariant::Original,
        ImageVariant::Small,
        ImageVariant::Medium,
        ImageVariant::Large,
    ];

    /// Maximum pixel count on the longer edge, `None` for pass-through.
    pub fn max_dimension(self) -> Option<u32> {
        match self {
            ImageVariant::Original => None,
            ImageVariant::Small => Some(256),
            ImageVariant::Medium => Some(512),
            ImageVariant::Large => Some(1024),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageVariant::Original => "original",
            ImageVariant::Small => "small",
            ImageVariant::Medium => "medium",
            ImageVariant::Large => "large",
        }
    }
}

/// A single image (original or resized) within the blob store.
///
/// The `Image` row stores metadata, not the pixel data; the payload lives at
/// `path` inside the blob store. `(upload_id, variant)` is unique, and an
/// image cannot outlive its upload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Image {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Upload this image was derived from.
    pub upload_id: Uuid,

    pub variant: ImageVariant,

    /// Blob-store path of the encoded image, e.g. `images/small/<uuid>.jpg`.
    pub path: String,

    /// Pixel width; 0 when the source could not be probed.
    pub width: i64,

    /// Pixel height; 0 when the source could not be probed.
    pub height: i64,

    /// Encoded size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub mime_type: String,

    pub created_at: DateTime<Utc>,
}
