//! src/services/blob_store.rs
//!
//! BlobStore — path-keyed byte storage on the local filesystem beneath a
//! single root directory. Callers address blobs with forward-slash relative
//! paths (`chunks/<upload_id>/chunk_3`, `uploads/<stored_filename>`,
//! `images/small/<uuid>.jpg`); the store maps them onto the disk and keeps
//! every write atomic to concurrent readers via write-then-rename.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Filesystem-backed blob store.
///
/// Whole-object `put` writes go to a temporary sibling first, are fsynced,
/// and then renamed into place, so a reader never observes a partial object.
/// `delete` and `delete_prefix` are idempotent.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

const MAX_BLOB_PATH_LEN: usize = 1024;

impl BlobStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Basic path validation to avoid trivial traversal vectors.
    ///
    /// Rejects empty paths, absolute paths, `..` segments, and control or
    /// backslash characters.
    fn ensure_path_safe(&self, path: &str) -> BlobResult<()> {
        if path.is_empty() || path.len() > MAX_BLOB_PATH_LEN {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        if path.starts_with('/') || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        if path
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    fn fs_path(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        for seg in path.split('/') {
            out.push(seg);
        }
        out
    }

    /// Resolve a blob path to its location on disk without touching it.
    pub fn path_on_fs(&self, path: &str) -> BlobResult<PathBuf> {
        self.ensure_path_safe(path)?;
        Ok(self.fs_path(path))
    }

    /// Store a whole object atomically. Overwrites an existing blob.
    pub async fn put(&self, path: &str, bytes: &[u8]) -> BlobResult<()> {
        self.ensure_path_safe(path)?;
        let dest = self.fs_path(path);
        let parent = dest.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_all_synced(&mut file, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        drop(file);

        rename_over(&tmp_path, &dest).await?;
        Ok(())
    }

    /// Read a whole object into memory.
    pub async fn get(&self, path: &str) -> BlobResult<Vec<u8>> {
        self.ensure_path_safe(path)?;
        match fs::read(self.fs_path(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    pub async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.ensure_path_safe(path)?;
        Ok(fs::try_exists(self.fs_path(path)).await?)
    }

    /// Delete a blob. No-op if it does not exist.
    pub async fn delete(&self, path: &str) -> BlobResult<()> {
        self.ensure_path_safe(path)?;
        match fs::remove_file(self.fs_path(path)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path);
                Ok(())
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    /// Recursively delete everything beneath a prefix. Safe to call
    /// repeatedly; a missing prefix is not an error.
    pub async fn delete_prefix(&self, prefix: &str) -> BlobResult<()> {
        self.ensure_path_safe(prefix)?;
        match fs::remove_dir_all(self.fs_path(prefix)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    /// Concatenate stored blobs, in the given order, into one new blob.
    ///
    /// The destination is written with the same tmp-then-rename discipline as
    /// `put`, so readers never see a partially assembled object. Returns the
    /// number of bytes written. A missing source aborts the write and leaves
    /// no destination behind.
    pub async fn concat_into(&self, dest: &str, sources: &[String]) -> BlobResult<u64> {
        self.ensure_path_safe(dest)?;
        for src in sources {
            self.ensure_path_safe(src)?;
        }

        let dest_path = self.fs_path(dest);
        let parent = dest_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let mut written: u64 = 0;

        for src in sources {
            let mut reader = match File::open(self.fs_path(src)).await {
                Ok(f) => f,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::NotFound(src.clone()));
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::Io(err));
                }
            };
            match tokio::io::copy(&mut reader, &mut file).await {
                Ok(n) => written += n,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::Io(err));
                }
            }
        }

        if let Err(err) = flush_and_sync(&mut file).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        drop(file);

        rename_over(&tmp_path, &dest_path).await?;
        Ok(written)
    }
}

async fn write_all_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    flush_and_sync(file).await
}

async fn flush_and_sync(file: &mut File) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

/// Rename tmp into place, replacing an existing destination if the platform
/// reports AlreadyExists instead of overwriting.
async fn rename_over(tmp: &Path, dest: &Path) -> BlobResult<()> {
    if let Err(err) = fs::rename(tmp, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp, dest).await?;
        } else {
            let _ = fs::remove_file(tmp).await;
            return Err(BlobError::Io(err));
        }
    }
    Ok(())
}
