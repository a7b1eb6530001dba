//! Per-upload exclusive locks.
//!
//! SQLite has no `SELECT ... FOR UPDATE`, so the upload engine serialises
//! receive_chunk / complete / cancel for a given upload with an in-process
//! async lock registry. Operations on different uploads stay fully parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry handing out one exclusive lock per upload id.
#[derive(Debug, Default)]
pub struct UploadLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for an upload, waiting if another task
    /// holds it. The guard is owned so it can cross await points freely.
    pub async fn acquire(&self, upload_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(upload_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for an upload that reached a terminal state.
    /// A late acquire simply recreates it.
    pub async fn purge(&self, upload_id: Uuid) {
        let mut map = self.inner.lock().await;
        map.remove(&upload_id);
    }
}
