//! Crate-wide error taxonomy and its HTTP rendering.
//!
//! Services return [`IngestError`] directly; the `IntoResponse` impl renders
//! the common `{success, message, error}` envelope with a machine-readable
//! kind so clients can branch without parsing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::blob_store::BlobError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    NotFound(String),

    /// Malformed input that never reached semantic validation (bad base64,
    /// bad JSON, unparseable multipart).
    #[error("{0}")]
    Malformed(String),

    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    #[error("{0}")]
    ChecksumMismatch(String),

    /// The operation is inapplicable to the entity's current state.
    #[error("{0}")]
    StateConflict(String),

    #[error(transparent)]
    Storage(#[from] BlobError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        IngestError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Vec<String>) -> Self {
        IngestError::Validation {
            message: message.into(),
            details,
        }
    }

    /// Stable machine-readable kind for the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::NotFound(_) => "not_found",
            IngestError::Malformed(_) => "malformed",
            IngestError::Validation { .. } => "validation",
            IngestError::ChecksumMismatch(_) => "checksum_mismatch",
            IngestError::StateConflict(_) => "state_conflict",
            IngestError::Storage(_) | IngestError::Io(_) => "storage",
            IngestError::Database(_) => "database",
            IngestError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Malformed(_) => StatusCode::BAD_REQUEST,
            IngestError::Validation { .. } | IngestError::ChecksumMismatch(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            IngestError::StateConflict(_) => StatusCode::CONFLICT,
            IngestError::Storage(BlobError::NotFound(_)) => StatusCode::NOT_FOUND,
            IngestError::Storage(_)
            | IngestError::Io(_)
            | IngestError::Database(_)
            | IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs, not the wire.
        let message = match &self {
            IngestError::Storage(_) | IngestError::Io(_) => {
                tracing::error!(error = %self, "storage failure");
                "storage failure".to_string()
            }
            IngestError::Database(_) => {
                tracing::error!(error = %self, "database failure");
                "database failure".to_string()
            }
            IngestError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let mut error = json!({ "kind": self.kind() });
        if let IngestError::Validation { details, .. } = &self {
            if !details.is_empty() {
                error["details"] = json!(details);
            }
        }

        let body = Json(json!({
            "success": false,
            "message": message,
            "error": error,
        }));

        (status, body).into_response()
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
