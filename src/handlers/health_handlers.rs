//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the catalogue DB and the blob root

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Serialize)]
struct Probe {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Probe {
    fn pass() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: Probe,
    storage: Probe,
}

/// `GET /healthz`
///
/// Liveness only — no I/O, always 200.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against the catalogue database and a write/read/delete
/// round trip under the blob root. 200 when both pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => Probe::pass(),
        Ok(other) => Probe::fail(format!("unexpected result: {other}")),
        Err(err) => Probe::fail(err.to_string()),
    };

    let storage = storage_probe(&state).await;

    let ready = database.ok && storage.ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ok" } else { "error" },
            database,
            storage,
        }),
    )
}

/// Write, read back and remove a marker file under the blob root.
async fn storage_probe(state: &AppState) -> Probe {
    let marker = state
        .blobs
        .root()
        .join(format!(".readyz-{}", Uuid::new_v4()));

    if let Err(err) = fs::write(&marker, b"readyz").await {
        return Probe::fail(format!("could not write probe file: {err}"));
    }

    let probe = match fs::read(&marker).await {
        Ok(bytes) if bytes == b"readyz" => Probe::pass(),
        Ok(_) => Probe::fail("probe file content mismatch"),
        Err(err) => Probe::fail(format!("could not read probe file: {err}")),
    };

    // Cleanup is best-effort; a leftover marker never fails readiness.
    let _ = fs::remove_file(&marker).await;
    probe
}
