//! SHA-256 helpers for chunk and whole-file integrity checks.
//!
//! All comparisons against client-supplied checksums go through
//! [`checksums_match`], which lowercases both sides and compares in constant
//! time.

use std::path::Path;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::{fs::File, io::AsyncReadExt};

const FILE_READ_BUF: usize = 64 * 1024;

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, streamed so large blobs never sit in
/// memory.
pub async fn sha256_hex_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_READ_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Constant-time comparison of two hex checksums.
///
/// Both sides are lowercased first; a length mismatch is an immediate false
/// (lengths are not secret).
pub fn checksums_match(a: &str, b: &str) -> bool {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// True iff `value` is a well-formed SHA-256 hex digest (64 hex chars,
/// either case).
pub fn is_valid_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
